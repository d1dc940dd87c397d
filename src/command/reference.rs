//! Index the reference and split it into load-balanced regions for parallel variant calling.

use std::{
    path::{Path, PathBuf},
    process::Command,
    rc::Rc,
    time::Instant,
};
use crate::{
    Error,
    err::validate_param,
    ext,
    seq::{Contigs, LoadProfile, RegionPartition},
};

/// Returns `<reference>.fai`, running `samtools faidx` if the index does not exist yet.
pub(super) fn ensure_fai(samtools: &Path, reference: &Path) -> Result<PathBuf, Error> {
    let fai = ext::sys::append_path(reference, ".fai");
    if ext::sys::file_size(&fai)?.unwrap_or(0) > 0 {
        log::debug!("    FASTA index {} exists, skipping indexing", ext::fmt::path(&fai));
        return Ok(fai);
    }
    let mut command = Command::new(samtools);
    command.arg("faidx").arg(reference);
    log::debug!("    {}", ext::fmt::command(&command));
    let output = command.output().map_err(crate::err::add_path!(samtools))?;
    if !output.status.success() {
        return Err(Error::subprocess("samtools faidx", &output));
    }
    Ok(fai)
}

/// Region file name: `<reference stem>.<chunks>.regions`.
pub(super) fn regions_filename(out_dir: &Path, reference: &Path, n_chunks: u64) -> PathBuf {
    let stem = reference.file_name()
        .map(|name| name.to_string_lossy())
        .map(|name| name.split('.').next().unwrap_or("reference").to_string())
        .filter(|stem| !stem.is_empty())
        .unwrap_or_else(|| "reference".to_string());
    out_dir.join(format!("{}.{}.regions", stem, n_chunks))
}

/// Converts the requested number of chunks into a positive number.
pub(super) fn validate_chunks(n_chunks: i64) -> Result<u64, Error> {
    validate_param!(n_chunks > 0, "Number of chunks ({}) must be positive", n_chunks);
    Ok(n_chunks as u64)
}

/// Splits the reference into `n_chunks` region sets with approximately equal expected load,
/// estimated from the sample alignments. Writes regions into `out_dir` and returns the filename.
///
/// Fails before accessing any files if `n_chunks` is not positive.
pub(super) fn partition(
    samtools: &Path,
    reference: &Path,
    n_chunks: i64,
    bams: &[PathBuf],
    out_dir: &Path,
) -> Result<PathBuf, Error>
{
    let n_chunks = validate_chunks(n_chunks)?;
    let fai = ensure_fai(samtools, reference)?;

    let start = Instant::now();
    let contigs = Rc::new(Contigs::from_fai("reference".to_string(), &fai)?);
    validate_param!(n_chunks <= contigs.genome_size(),
        "Number of chunks ({}) exceeds the reference length ({} bp)", n_chunks, contigs.genome_size());
    log::info!("    Reference contains {} contig(s), {} bp", contigs.len(), contigs.genome_size());

    let profile = if bams.is_empty() {
        log::warn!("    No alignments available, splitting reference by length");
        LoadProfile::uniform(&contigs)
    } else {
        LoadProfile::from_bams(&contigs, bams)?
    };
    let partition = RegionPartition::balanced(&contigs, &profile, n_chunks)?;
    let filename = regions_filename(out_dir, reference, n_chunks);
    partition.save(&filename)?;
    log::info!("    Wrote {} region set(s) ({} regions) to {}", partition.len(), partition.regions().count(),
        ext::fmt::path(&filename));
    log::debug!("    Finished in {}", ext::fmt::Duration(start.elapsed()));
    Ok(filename)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    #[test]
    fn non_positive_chunks_fail_early() {
        let dir = tempfile::tempdir().unwrap();
        let out_dir = dir.path().join("out");
        for n in [0, -1, -144679] {
            let res = partition(Path::new("/nonexistent/samtools"), &dir.path().join("absent.fa"),
                n, &[], &out_dir);
            assert!(matches!(res, Err(Error::InvalidInput(_))));
        }
        // Nothing was created.
        assert!(!out_dir.exists());
        assert_eq!(fs::read_dir(dir.path()).unwrap().count(), 0);
    }

    #[test]
    fn existing_index_is_reused() {
        let dir = tempfile::tempdir().unwrap();
        let reference = dir.path().join("MTB_ancestor.fa");
        fs::write(&reference, ">chr\nACGTACGTAC\n").unwrap();
        fs::write(dir.path().join("MTB_ancestor.fa.fai"), "chr\t10\t5\t10\t11\n").unwrap();
        let out_dir = dir.path().join("out");
        fs::create_dir(&out_dir).unwrap();

        // samtools does not exist, but it is not needed.
        let filename = partition(Path::new("/nonexistent/samtools"), &reference, 4, &[], &out_dir).unwrap();
        assert_eq!(filename, out_dir.join("MTB_ancestor.4.regions"));
        let lines: Vec<_> = fs::read_to_string(&filename).unwrap().lines().map(String::from).collect();
        assert_eq!(lines.len(), 4);
        assert_eq!(lines[0], "chr:0-3");
        assert_eq!(lines[3], "chr:8-10");

        let res = partition(Path::new("/nonexistent/samtools"), &reference, 11, &[], &out_dir);
        assert!(matches!(res, Err(Error::InvalidInput(_))));
    }

    #[test]
    fn region_filenames() {
        let out = Path::new("/out/Variants");
        assert_eq!(regions_filename(out, Path::new("/ref/MTB_ancestorII_reference.fa"), 144679),
            Path::new("/out/Variants/MTB_ancestorII_reference.144679.regions"));
        assert_eq!(regions_filename(out, Path::new("genome.fa.gz"), 10),
            Path::new("/out/Variants/genome.10.regions"));
    }
}
