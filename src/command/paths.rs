//! Paths to various directories and files within the input and output directories.

use std::path::{Path, PathBuf};
use crate::{Error, ext};

/// Quality-filtered reads are stored in `input/FILTERED_FASTQ`.
pub(super) const FILTERED_FASTQ: &'static str = "Samples_Fastq/Filtered_Fastq";

/// Sorted and indexed alignments are stored in `output/BAM_DIR/<sample>.sort.bam`.
pub(super) const BAM_DIR: &'static str = "Bam";
/// Suffix of the sorted alignment files.
pub(super) const SORTED_BAM: &'static str = ".sort.bam";
/// Variant calls and reference regions are stored in `output/VARIANTS_DIR`.
pub(super) const VARIANTS_DIR: &'static str = "Variants";
/// Statistics are stored in `output/STATS_DIR/{Bamstats,Coverage}`.
pub(super) const STATS_DIR: &'static str = "Stats";
const STATS_SUBDIRS: [&'static str; 2] = ["Bamstats", "Coverage"];
/// Sample comparisons are stored in `output/COMPARE_DIR`.
pub(super) const COMPARE_DIR: &'static str = "Compare";
/// Annotation is stored in `output/ANNOT_DIR/{snpeff,user,user_aa,blast}`.
pub(super) const ANNOT_DIR: &'static str = "Annotation";
const ANNOT_SUBDIRS: [&'static str; 4] = ["snpeff", "user", "user_aa", "blast"];
/// Run logs and external tool logs are stored in `output/LOGS_DIR`.
pub(super) const LOGS_DIR: &'static str = "Logs";

/// Parameters of the previous run are stored in `output/PARAMS`.
pub(super) const PARAMS: &'static str = "params.json";

/// Fixed directory structure of the output directory.
pub(super) struct OutLayout {
    root: PathBuf,
}

impl OutLayout {
    /// Creates all output directories, if they do not exist yet. Existing files are never touched.
    pub fn create(root: &Path) -> Result<Self, Error> {
        let layout = Self { root: root.to_owned() };
        for dir in layout.dirs() {
            ext::sys::mkdir(&dir)?;
        }
        Ok(layout)
    }

    /// All directories in the creation order.
    fn dirs(&self) -> Vec<PathBuf> {
        let mut dirs = vec![
            self.root.clone(),
            self.bam_dir(),
            self.variants_dir(),
            self.root.join(STATS_DIR),
        ];
        dirs.extend(STATS_SUBDIRS.iter().map(|sub| self.root.join(STATS_DIR).join(sub)));
        dirs.push(self.root.join(COMPARE_DIR));
        dirs.push(self.root.join(ANNOT_DIR));
        dirs.extend(ANNOT_SUBDIRS.iter().map(|sub| self.root.join(ANNOT_DIR).join(sub)));
        dirs.push(self.logs_dir());
        dirs
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn bam_dir(&self) -> PathBuf {
        self.root.join(BAM_DIR)
    }

    pub fn variants_dir(&self) -> PathBuf {
        self.root.join(VARIANTS_DIR)
    }

    pub fn logs_dir(&self) -> PathBuf {
        self.root.join(LOGS_DIR)
    }

    /// Sorted alignment file for the sample.
    pub fn sample_bam(&self, sample: &str) -> PathBuf {
        self.bam_dir().join(format!("{}{}", sample, SORTED_BAM))
    }

    /// Variant calls for the sample.
    pub fn sample_vcf(&self, sample: &str) -> PathBuf {
        self.variants_dir().join(format!("{}.vcf", sample))
    }
}
