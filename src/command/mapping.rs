//! Map reads of each sample to the reference, sort and index alignments.

use std::{
    fs::{self, File},
    io::BufWriter,
    path::{Path, PathBuf},
    process::{Command, Stdio},
    thread,
    time::Instant,
};
use colored::Colorize;
use crate::{
    Error,
    err::{self, add_path},
    ext,
    sample::Sample,
};
use super::{
    Rerun,
    paths::OutLayout,
};

/// Minimap2 preset for Oxford Nanopore reads.
const MINIMAP_PRESET: &'static str = "map-ont";

/// State of the sorted and indexed alignment file, left from a previous run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(super) enum ArtifactStatus {
    /// Alignment file is complete and indexed.
    Complete,
    /// Neither alignment nor its index exist.
    Missing,
    /// Something exists, but cannot be trusted (reason).
    Incomplete(&'static str),
}

/// Sorted alignment file together with its index.
pub(super) struct AlignmentArtifact {
    bam: PathBuf,
    bai: PathBuf,
}

impl AlignmentArtifact {
    pub fn new(bam: PathBuf) -> Self {
        let bai = ext::sys::append_path(&bam, ".bai");
        Self { bam, bai }
    }

    pub fn bam(&self) -> &Path {
        &self.bam
    }

    /// Alignment file is complete if it is not empty and ends with the BGZF EOF marker,
    /// and its index exists, is not empty, and is not older than the alignment file.
    pub fn status(&self) -> Result<ArtifactStatus, Error> {
        let bam_size = ext::sys::file_size(&self.bam)?;
        let bai_size = ext::sys::file_size(&self.bai)?;
        Ok(match (bam_size, bai_size) {
            (None, None) => ArtifactStatus::Missing,
            (None, Some(_)) => ArtifactStatus::Incomplete("index exists without the alignment file"),
            (Some(0), _) => ArtifactStatus::Incomplete("alignment file is empty"),
            (Some(_), _) if !ext::sys::has_bgzf_eof(&self.bam)? =>
                ArtifactStatus::Incomplete("alignment file is truncated"),
            (Some(_), None) => ArtifactStatus::Incomplete("index is missing"),
            (Some(_), Some(0)) => ArtifactStatus::Incomplete("index is empty"),
            (Some(_), Some(_)) => {
                if ext::sys::modified(&self.bai)? < ext::sys::modified(&self.bam)? {
                    ArtifactStatus::Incomplete("index is older than the alignment file")
                } else {
                    ArtifactStatus::Complete
                }
            }
        })
    }

    /// Removes alignment file and its index.
    pub fn remove(&self) -> Result<(), Error> {
        ext::sys::remove_if_exists(&self.bai)?;
        ext::sys::remove_if_exists(&self.bam)
    }
}

/// What happened to a single sample.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(super) enum Outcome {
    Skipped,
    Mapped,
}

/// Summary of the mapping stage.
#[derive(Default)]
pub(super) struct Summary {
    pub mapped: usize,
    pub skipped: usize,
    /// Complete alignment files, one per sample.
    pub bams: Vec<PathBuf>,
}

/// Runs minimap2 and samtools for each sample.
pub(super) struct Mapper<'a> {
    pub reference: &'a Path,
    pub minimap: &'a Path,
    pub samtools: &'a Path,
    pub threads: u16,
    pub rerun: Rerun,
}

impl<'a> Mapper<'a> {
    /// Maps all samples one after another. Stops at the first failure.
    pub fn map_all(&self, samples: &[Sample], layout: &OutLayout) -> Result<Summary, Error> {
        let mut summary = Summary::default();
        if samples.is_empty() {
            log::warn!("No samples to map");
            return Ok(summary);
        }
        for (i, sample) in samples.iter().enumerate() {
            log::info!("[{}/{}] Sample {}", i + 1, samples.len(), sample.name().bold());
            match self.map_sample(sample, layout)? {
                Outcome::Skipped => summary.skipped += 1,
                Outcome::Mapped => summary.mapped += 1,
            }
            summary.bams.push(layout.sample_bam(sample.name()));
        }
        Ok(summary)
    }

    /// Maps reads of a single sample, unless a complete alignment already exists.
    pub fn map_sample(&self, sample: &Sample, layout: &OutLayout) -> Result<Outcome, Error> {
        let artifact = AlignmentArtifact::new(layout.sample_bam(sample.name()));
        if self.rerun.discard_existing(artifact.bam()) {
            artifact.remove()?;
        }
        match artifact.status()? {
            ArtifactStatus::Complete => {
                log::info!("    {} exists, skipping mapping of sample {}",
                    ext::fmt::path(artifact.bam()).yellow(), sample.name());
                return Ok(Outcome::Skipped);
            }
            ArtifactStatus::Incomplete(reason) => {
                log::warn!("    Existing output for sample {} is incomplete ({}), mapping again", sample.name(), reason);
                artifact.remove()?;
            }
            ArtifactStatus::Missing => {}
        }

        let start = Instant::now();
        log::info!("    Mapping {} read file(s) of sample {}", sample.reads().len(), sample.name().green());
        let log_filename = layout.logs_dir().join(format!("{}.minimap2.log", sample.name()));
        self.run_mapping(sample.reads(), artifact.bam(), &log_filename)?;
        if let Err(e) = self.run_indexing(artifact.bam()) {
            artifact.remove()?;
            return Err(e);
        }
        log::debug!("    Finished in {}", ext::fmt::Duration(start.elapsed()));
        Ok(Outcome::Mapped)
    }

    fn create_mapping_command(&self, reads: &[PathBuf]) -> Command {
        let mut command = Command::new(self.minimap);
        command.args(&[
            "-a", // Output SAM format,
            "-x", MINIMAP_PRESET, // Set mapping preset,
            "-t", &self.threads.to_string(), // Specify the number of threads.
            ])
            .arg(self.reference);
        if reads.len() == 1 {
            command.arg(&reads[0]);
        } else {
            // Several read files are concatenated into the standard input.
            command.arg("-").stdin(Stdio::piped());
        }
        command.stdout(Stdio::piped());
        command
    }

    /// minimap2 | samtools view (discard unmapped) | samtools sort.
    /// Output is first written into a temporary file, and renamed only if all three commands succeed.
    fn run_mapping(&self, reads: &[PathBuf], out_bam: &Path, log_filename: &Path) -> Result<(), Error> {
        let tmp_bam = out_bam.with_extension("tmp.bam");
        ext::sys::remove_if_exists(&tmp_bam)?;
        let log_file = File::create(log_filename).map_err(add_path!(log_filename))?;

        let mut mapping = self.create_mapping_command(reads);
        let mut filtering = Command::new(self.samtools);
        // See SAM flags here: https://broadinstitute.github.io/picard/explain-flags.html.
        filtering.args(&["view",
                "-b", // Output BAM,
                "-F", "4", // Ignore unmapped reads.
                "-"]);
        let mut sorting = Command::new(self.samtools);
        sorting.args(&["sort", "-@", &self.threads.to_string(), "-o"]).arg(&tmp_bam).arg("-");
        log::debug!("    {} | {} | {}", ext::fmt::command(&mapping), ext::fmt::command(&filtering),
            ext::fmt::command(&sorting));

        mapping.stderr(log_file.try_clone().map_err(add_path!(log_filename))?);
        let mut mapping_child = mapping.spawn().map_err(add_path!(self.minimap))?;
        let mapping_stdin = mapping_child.stdin.take();
        let mapping_stdout = mapping_child.stdout.take();
        let mut mapping_guard = ext::sys::ChildGuard::new(mapping_child);
        let writer = mapping_stdin.map(|stdin| {
            let reads = reads.to_vec();
            thread::spawn(move || ext::sys::concat_files(&reads, BufWriter::new(stdin)))
        });

        let mapping_stdout = mapping_stdout.ok_or_else(|| Error::RuntimeError("minimap2 stdout is closed".to_string()))?;
        filtering.stdin(Stdio::from(mapping_stdout))
            .stdout(Stdio::piped())
            .stderr(log_file);
        let mut filtering_child = filtering.spawn().map_err(add_path!(self.samtools))?;
        // Commands keep copies of the pipe ends, which would block upstream processes on failure.
        drop(filtering);
        let filtering_stdout = filtering_child.stdout.take();
        let mut filtering_guard = ext::sys::ChildGuard::new(filtering_child);

        let filtering_stdout = filtering_stdout.ok_or_else(|| Error::RuntimeError("samtools view stdout is closed".to_string()))?;
        sorting.stdin(Stdio::from(filtering_stdout));
        let sorting_output = sorting.output().map_err(add_path!(self.samtools))?;
        // Otherwise, samtools view would wait forever to write into the pipe if sorting stopped early.
        drop(sorting);

        let mapping_status = mapping_guard.child_mut().wait().map_err(add_path!(!))?;
        mapping_guard.disarm();
        let filtering_status = filtering_guard.child_mut().wait().map_err(add_path!(!))?;
        filtering_guard.disarm();

        // If sorting fails, upstream commands are usually killed by SIGPIPE, so sorting goes first.
        let mut failed = Vec::new();
        let mut descr = format!("see {} for details", ext::fmt::path(log_filename));
        if !sorting_output.status.success() {
            failed.push(format!("samtools sort ({})", sorting_output.status));
            descr += &err::stderr_tail(&sorting_output.stderr);
        }
        if !mapping_status.success() {
            failed.push(format!("minimap2 ({})", mapping_status));
        }
        if !filtering_status.success() {
            failed.push(format!("samtools view ({})", filtering_status));
        }
        if !failed.is_empty() {
            ext::sys::remove_if_exists(&tmp_bam)?;
            return Err(Error::Subprocess(failed.join(" | "), descr));
        }
        if let Some(handle) = writer {
            handle.join().map_err(|_| Error::RuntimeError("Read streaming thread panicked".to_string()))??;
        }
        fs::rename(&tmp_bam, out_bam).map_err(add_path!(tmp_bam, out_bam))?;
        Ok(())
    }

    fn run_indexing(&self, bam: &Path) -> Result<(), Error> {
        let mut indexing = Command::new(self.samtools);
        indexing.args(&["index", "-@", &self.threads.to_string()]).arg(bam);
        log::debug!("    {}", ext::fmt::command(&indexing));
        let output = indexing.output().map_err(add_path!(self.samtools))?;
        if output.status.success() {
            Ok(())
        } else {
            Err(Error::subprocess("samtools index", &output))
        }
    }
}
