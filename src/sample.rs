//! Discover quality-filtered read files and group them into samples.

use std::{
    fmt, fs,
    collections::{BTreeMap, BTreeSet},
    path::{Path, PathBuf},
};
use regex::Regex;
use crate::{
    Error,
    err::{add_path, error},
    ext,
};

/// Quality-filtered read files start with this marker: `HQ_<sample>[_<suffix>].fastq[.gz]`.
pub const HQ_MARKER: &'static str = "HQ";

lazy_static::lazy_static! {
    /// FASTQ file extensions, optionally gzip compressed.
    static ref FASTQ_EXT: Regex = Regex::new(r"\.f(ast)?q(\.gz)?$").unwrap();
    static ref SAMPLE_NAME: Regex = Regex::new(r"^[A-Za-z0-9-]+$").unwrap();
}

/// Parses sample name from a quality-filtered read file name.
///
/// File name is cut at the first dot, and split by underscores. First part must be equal to `HQ`,
/// second part is the sample name, remaining parts (run, flow cell) are ignored.
pub fn parse_read_name(filename: &str) -> Result<String, Error> {
    let stem = filename.split_once('.').map(|(stem, _)| stem).unwrap_or(filename);
    let mut parts = stem.split('_');
    if parts.next() != Some(HQ_MARKER) {
        return Err(error!(ParsingError, "Read file {} does not start with {}_", filename, HQ_MARKER));
    }
    match parts.next() {
        Some(name) if SAMPLE_NAME.is_match(name) => Ok(name.to_string()),
        Some("") | None => Err(error!(ParsingError, "Read file {} does not contain sample name \
            (expected {}_<sample>[_<suffix>].fastq)", filename, HQ_MARKER)),
        Some(name) => Err(error!(ParsingError, "Read file {} contains invalid sample name '{}'", filename, name)),
    }
}

/// Quality-filtered read file, belonging to a sample.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ReadFile {
    path: PathBuf,
    sample: String,
}

impl ReadFile {
    /// Creates read file record from the path, parsing sample name from the file name.
    pub fn from_path(path: PathBuf) -> Result<Self, Error> {
        let filename = path.file_name().and_then(|s| s.to_str())
            .ok_or_else(|| error!(ParsingError, "Cannot decode file name {}", ext::fmt::path(&path)))?;
        let sample = parse_read_name(filename)?;
        Ok(Self { path, sample })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

/// Returns true if the file name looks like a quality-filtered FASTQ file.
fn is_hq_fastq(filename: &str) -> bool {
    FASTQ_EXT.is_match(filename) && filename.starts_with(HQ_MARKER)
}

/// Finds all quality-filtered read files directly within the directory (not recursively).
/// Output is sorted by path.
///
/// Files without the `HQ` marker are ignored, files with the marker but with an unparsable name produce an error.
pub fn discover(dir: &Path) -> Result<Vec<ReadFile>, Error> {
    if !dir.is_dir() {
        return Err(error!(InvalidInput, "Read directory {} does not exist", ext::fmt::path(dir)));
    }
    let mut reads = Vec::new();
    for entry in fs::read_dir(dir).map_err(add_path!(dir))? {
        let entry = entry.map_err(add_path!(dir))?;
        let path = entry.path();
        if !entry.file_type().map_err(add_path!(path))?.is_file() {
            continue;
        }
        let filename = entry.file_name();
        match filename.to_str() {
            Some(s) if is_hq_fastq(s) => reads.push(ReadFile::from_path(path)?),
            _ => log::debug!("    Skipping {}", ext::fmt::path(&path)),
        }
    }
    reads.sort_by(|a, b| a.path.cmp(&b.path));
    Ok(reads)
}

/// Sample together with all of its read files.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Sample {
    name: String,
    reads: Vec<PathBuf>,
}

impl Sample {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn reads(&self) -> &[PathBuf] {
        &self.reads
    }
}

impl fmt::Display for Sample {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str(&self.name)
    }
}

/// Groups read files by sample name. Output is sorted by name, each name appears once.
pub fn group_samples(reads: &[ReadFile]) -> Vec<Sample> {
    let mut groups: BTreeMap<&str, Vec<PathBuf>> = BTreeMap::new();
    for read in reads {
        groups.entry(read.sample.as_str()).or_default().push(read.path.clone());
    }
    groups.into_iter()
        .map(|(name, reads)| Sample { name: name.to_string(), reads })
        .collect()
}

/// Explicit set of samples to analyse.
#[derive(Clone, Debug, Default)]
pub struct SampleFilter {
    names: BTreeSet<String>,
}

impl SampleFilter {
    pub fn new<S: Into<String>>(names: impl IntoIterator<Item = S>) -> Self {
        Self {
            names: names.into_iter().map(Into::into).collect(),
        }
    }

    /// Adds sample names from a file: one name per line, empty lines and lines starting with `#` are skipped.
    pub fn extend_from_file(&mut self, filename: &Path) -> Result<(), Error> {
        let contents = fs::read_to_string(filename).map_err(add_path!(filename))?;
        self.names.extend(contents.lines()
            .map(str::trim)
            .filter(|line| !line.is_empty() && !line.starts_with('#'))
            .map(String::from));
        Ok(())
    }

    pub fn insert(&mut self, name: impl Into<String>) {
        self.names.insert(name.into());
    }

    pub fn len(&self) -> usize {
        self.names.len()
    }

    /// Keeps only samples, present in the filter. Filter names that were not discovered are reported.
    pub fn apply(&self, samples: Vec<Sample>) -> Vec<Sample> {
        let found: BTreeSet<&str> = samples.iter().map(Sample::name).collect();
        let missing: Vec<&str> = self.names.iter().map(String::as_str).filter(|name| !found.contains(name)).collect();
        if !missing.is_empty() {
            log::warn!("{} requested sample(s) have no read files: {}", missing.len(), ext::fmt::list(&missing, 10));
        }
        samples.into_iter().filter(|sample| self.names.contains(&sample.name)).collect()
    }
}

/// Discovers read files and groups them into samples, optionally keeping only samples from the filter.
pub fn resolve(dir: &Path, filter: Option<&SampleFilter>) -> Result<(Vec<Sample>, Vec<ReadFile>), Error> {
    let reads = discover(dir)?;
    let mut samples = group_samples(&reads);
    if let Some(filter) = filter {
        samples = filter.apply(samples);
    }
    Ok((samples, reads))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn touch(dir: &Path, names: &[&str]) {
        for name in names {
            fs::write(dir.join(name), "@r\nACGT\n+\nIIII\n").unwrap();
        }
    }

    fn names(samples: &[Sample]) -> Vec<&str> {
        samples.iter().map(Sample::name).collect()
    }

    #[test]
    fn parse_names() {
        assert_eq!(parse_read_name("HQ_BC09.fastq").unwrap(), "BC09");
        assert_eq!(parse_read_name("HQ_S1_run1.fastq.gz").unwrap(), "S1");
        assert_eq!(parse_read_name("HQ_sample-7_FAL12345_pass.fq").unwrap(), "sample-7");
        assert!(matches!(parse_read_name("HQ.fastq"), Err(Error::ParsingError(_))));
        assert!(matches!(parse_read_name("HQ__run1.fastq"), Err(Error::ParsingError(_))));
        assert!(matches!(parse_read_name("LQ_S1.fastq"), Err(Error::ParsingError(_))));
        assert!(matches!(parse_read_name("HQ_S 1.fastq"), Err(Error::ParsingError(_))));
    }

    #[test]
    fn empty_directory() {
        let dir = tempfile::tempdir().unwrap();
        let (samples, reads) = resolve(dir.path(), None).unwrap();
        assert!(samples.is_empty());
        assert!(reads.is_empty());
    }

    #[test]
    fn missing_directory() {
        let dir = tempfile::tempdir().unwrap();
        assert!(matches!(resolve(&dir.path().join("absent"), None), Err(Error::InvalidInput(_))));
    }

    #[test]
    fn skip_other_files() {
        let dir = tempfile::tempdir().unwrap();
        touch(dir.path(), &["HQ_S1.fastq", "S2.fastq", "HQ_S3.txt", "notes.md"]);
        fs::create_dir(dir.path().join("HQ_S4.fastq")).unwrap();
        let (samples, reads) = resolve(dir.path(), None).unwrap();
        assert_eq!(names(&samples), vec!["S1"]);
        assert_eq!(reads.len(), 1);
    }

    #[test]
    fn unparsable_file_fails() {
        let dir = tempfile::tempdir().unwrap();
        touch(dir.path(), &["HQ_S1.fastq", "HQ.fastq"]);
        assert!(matches!(resolve(dir.path(), None), Err(Error::ParsingError(_))));
    }

    #[test]
    fn merge_runs() {
        let dir = tempfile::tempdir().unwrap();
        touch(dir.path(), &["HQ_S1_run2.fastq", "HQ_S1_run1.fastq", "HQ_S2.fastq.gz"]);
        let (samples, reads) = resolve(dir.path(), None).unwrap();
        assert_eq!(reads.len(), 3);
        assert_eq!(names(&samples), vec!["S1", "S2"]);
        let s1_reads: Vec<_> = samples[0].reads().iter()
            .map(|p| p.file_name().unwrap().to_str().unwrap()).collect();
        assert_eq!(s1_reads, vec!["HQ_S1_run1.fastq", "HQ_S1_run2.fastq"]);
    }

    #[test]
    fn allow_list() {
        let dir = tempfile::tempdir().unwrap();
        touch(dir.path(), &["HQ_S1.fastq", "HQ_S2.fastq", "HQ_S3.fastq", "HQ_S4.fastq"]);
        let filter = SampleFilter::new(["S1", "S3"]);
        let (samples, reads) = resolve(dir.path(), Some(&filter)).unwrap();
        assert_eq!(names(&samples), vec!["S1", "S3"]);
        assert_eq!(reads.len(), 4);
    }

    #[test]
    fn allow_list_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let list = dir.path().join("samples.txt");
        fs::write(&list, "# wanted\nS3\n\n  S5 \n").unwrap();
        let mut filter = SampleFilter::default();
        filter.extend_from_file(&list).unwrap();
        filter.insert("S1");
        assert_eq!(filter.len(), 3);

        let samples = group_samples(&["HQ_S1.fastq", "HQ_S2.fastq", "HQ_S3.fastq"].iter()
            .map(|name| ReadFile::from_path(dir.path().join(name)).unwrap())
            .collect::<Vec<_>>());
        assert_eq!(names(&filter.apply(samples)), vec!["S1", "S3"]);
    }
}
