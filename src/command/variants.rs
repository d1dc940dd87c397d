//! Call variants in parallel over the reference regions with freebayes-parallel.

use std::{
    fs::{self, File},
    path::Path,
    process::{Command, Stdio},
    time::Instant,
};
use colored::Colorize;
use crate::{
    Error,
    err::{add_path, validate_param},
    ext,
    sample::Sample,
};
use super::{
    Rerun,
    paths::OutLayout,
};

/// Variant calling thresholds, passed to freebayes.
#[derive(Clone, Debug)]
pub(super) struct CallerParams {
    pub ploidy: u8,
    /// Minimal fraction of observations, supporting an alternate allele.
    pub min_allele_freq: f64,
    pub min_base_qual: u8,
    pub min_mapq: u8,
}

impl Default for CallerParams {
    fn default() -> Self {
        Self {
            ploidy: 1,
            min_allele_freq: 0.1,
            min_base_qual: 7,
            min_mapq: 10,
        }
    }
}

impl CallerParams {
    pub fn validate(&self) -> Result<(), Error> {
        validate_param!(self.ploidy > 0, "Ploidy must be positive");
        validate_param!(0.0 <= self.min_allele_freq && self.min_allele_freq <= 1.0,
            "Minimal allele frequency ({}) must be within [0, 1]", self.min_allele_freq);
        Ok(())
    }
}

/// Runs freebayes-parallel for each sample.
pub(super) struct VariantCaller<'a> {
    pub freebayes: &'a Path,
    pub reference: &'a Path,
    pub regions: &'a Path,
    pub threads: u16,
    pub params: &'a CallerParams,
    pub rerun: Rerun,
}

impl<'a> VariantCaller<'a> {
    fn create_command(&self, bam: &Path) -> Command {
        let mut command = Command::new(self.freebayes);
        command.arg(self.regions)
            .arg(self.threads.to_string())
            .arg("-f").arg(self.reference)
            .args(&[
                "--haplotype-length", "0", // Report SNPs and indels separately,
                "--use-best-n-alleles", "1",
                "--min-coverage", "1",
                "-p", &self.params.ploidy.to_string(),
                "-F", &self.params.min_allele_freq.to_string(),
                "-q", &self.params.min_base_qual.to_string(),
                "-m", &self.params.min_mapq.to_string(),
                "--strict-vcf",
            ])
            .arg(bam);
        command
    }

    /// Calls variants for all samples.
    /// Existing non-empty VCF files are kept, unless the alignment file was updated after them.
    pub fn call_all(&self, samples: &[Sample], layout: &OutLayout) -> Result<usize, Error> {
        let mut n_called = 0;
        for sample in samples {
            let vcf = layout.sample_vcf(sample.name());
            let bam = layout.sample_bam(sample.name());
            if self.rerun.discard_existing(&vcf) {
                ext::sys::remove_if_exists(&vcf)?;
            }
            if ext::sys::file_size(&vcf)?.unwrap_or(0) > 0 {
                if ext::sys::modified(&vcf)? >= ext::sys::modified(&bam)? {
                    log::info!("    {} exists, skipping variant calling for sample {}",
                        ext::fmt::path(&vcf).yellow(), sample.name());
                    continue;
                }
                log::warn!("    {} is older than the alignment file, calling variants again", ext::fmt::path(&vcf));
                ext::sys::remove_if_exists(&vcf)?;
            }
            self.call_sample(&bam, &vcf)?;
            n_called += 1;
        }
        Ok(n_called)
    }

    /// Variants are written into a temporary file, and renamed on success.
    fn call_sample(&self, bam: &Path, vcf: &Path) -> Result<(), Error> {
        let start = Instant::now();
        let tmp_vcf = ext::sys::append_path(vcf, ".tmp");
        let out_file = File::create(&tmp_vcf).map_err(add_path!(tmp_vcf))?;
        let mut command = self.create_command(bam);
        command.stdout(Stdio::from(out_file));
        log::debug!("    {} > {}", ext::fmt::command(&command), ext::fmt::path(&tmp_vcf));
        let output = match command.output() {
            Ok(output) => output,
            Err(e) => {
                ext::sys::remove_if_exists(&tmp_vcf)?;
                return Err(Error::Io(e, vec![self.freebayes.to_owned()]));
            }
        };
        if !output.status.success() {
            ext::sys::remove_if_exists(&tmp_vcf)?;
            return Err(Error::subprocess("freebayes-parallel", &output));
        }
        fs::rename(&tmp_vcf, vcf).map_err(add_path!(tmp_vcf, vcf))?;
        log::info!("    Variants written to {} ({})", ext::fmt::path(vcf), ext::fmt::Duration(start.elapsed()));
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn freebayes_command() {
        let params = CallerParams::default();
        let caller = VariantCaller {
            freebayes: Path::new("freebayes-parallel"),
            reference: Path::new("/ref/ref.fa"),
            regions: Path::new("/out/Variants/ref.100.regions"),
            threads: 36,
            params: &params,
            rerun: Rerun::None,
        };
        assert_eq!(ext::fmt::command(&caller.create_command(Path::new("/out/Bam/BC09.sort.bam"))),
            "freebayes-parallel /out/Variants/ref.100.regions 36 -f /ref/ref.fa --haplotype-length 0 \
            --use-best-n-alleles 1 --min-coverage 1 -p 1 -F 0.1 -q 7 -m 10 --strict-vcf /out/Bam/BC09.sort.bam");
    }

    #[test]
    fn existing_vcf_is_kept() {
        let dir = tempfile::tempdir().unwrap();
        let layout = OutLayout::create(dir.path()).unwrap();
        fs::write(dir.path().join("HQ_S1.fastq"), "").unwrap();
        let reads = vec![crate::sample::ReadFile::from_path(dir.path().join("HQ_S1.fastq")).unwrap()];
        let samples = crate::sample::group_samples(&reads);
        fs::write(layout.sample_vcf("S1"), "##fileformat=VCFv4.2\n").unwrap();

        let params = CallerParams::default();
        let caller = VariantCaller {
            freebayes: Path::new("/nonexistent/freebayes-parallel"),
            reference: Path::new("/nonexistent/ref.fa"),
            regions: Path::new("/nonexistent/ref.regions"),
            threads: 1,
            params: &params,
            rerun: Rerun::None,
        };
        assert_eq!(caller.call_all(&samples, &layout).unwrap(), 0);
        // Failed call leaves no partial output.
        fs::write(layout.sample_vcf("S1"), "").unwrap();
        assert!(caller.call_all(&samples, &layout).is_err());
        assert!(!ext::sys::append_path(&layout.sample_vcf("S1"), ".tmp").exists());
    }

    #[test]
    fn outdated_vcf_is_recalled() {
        let dir = tempfile::tempdir().unwrap();
        let layout = OutLayout::create(dir.path()).unwrap();
        fs::write(dir.path().join("HQ_S1.fastq"), "").unwrap();
        let reads = vec![crate::sample::ReadFile::from_path(dir.path().join("HQ_S1.fastq")).unwrap()];
        let samples = crate::sample::group_samples(&reads);
        let vcf = layout.sample_vcf("S1");
        fs::write(&vcf, "##fileformat=VCFv4.2\n").unwrap();
        std::thread::sleep(std::time::Duration::from_millis(20));
        // Sample was mapped again after the variants were called.
        fs::write(layout.sample_bam("S1"), "BAM").unwrap();

        let params = CallerParams::default();
        let caller = VariantCaller {
            freebayes: Path::new("/nonexistent/freebayes-parallel"),
            reference: Path::new("/nonexistent/ref.fa"),
            regions: Path::new("/nonexistent/ref.regions"),
            threads: 1,
            params: &params,
            rerun: Rerun::None,
        };
        assert!(caller.call_all(&samples, &layout).is_err());
        assert!(!vcf.exists());
    }

    #[test]
    fn invalid_params() {
        let mut params = CallerParams::default();
        assert!(params.validate().is_ok());
        params.min_allele_freq = 1.5;
        assert!(params.validate().is_err());
    }
}
