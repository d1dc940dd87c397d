//! Variant calling pipeline for Oxford Nanopore reads.

use std::{
    cmp::max,
    io::Write,
    path::{Path, PathBuf},
    time::Instant,
};
use colored::Colorize;
use const_format::str_repeat;
use crate::{
    Error,
    err::{validate_param, add_path},
    ext,
    sample::{self, SampleFilter},
};
use super::{
    paths::{self, OutLayout},
    logging::RunLogger,
    mapping::Mapper,
    reference,
    variants::{CallerParams, VariantCaller},
    Rerun,
};

/// Parameters, that need to be saved between executions.
/// Existing alignments cannot be reused if these parameters have changed.
#[derive(Debug, Clone, PartialEq)]
struct Params {
    reference: PathBuf,
    preset: String,
}

impl Params {
    fn save(&self) -> json::JsonValue {
        json::object!{
            reference: self.reference.to_string_lossy().into_owned(),
            preset: self.preset.clone(),
        }
    }

    /// Writes parameters into a JSON file.
    fn write(&self, path: &Path) -> Result<(), Error> {
        let mut f = ext::sys::create_file(path)?;
        self.save().write_pretty(&mut f, 4).map_err(add_path!(path))?;
        f.flush().map_err(add_path!(path))
    }

    fn load(obj: &json::JsonValue) -> Result<Self, Error> {
        let reference = obj["reference"].as_str()
            .ok_or_else(|| Error::JsonLoad(format!("Failed to parse '{}': missing field 'reference'", obj)))?;
        let preset = obj["preset"].as_str()
            .ok_or_else(|| Error::JsonLoad(format!("Failed to parse '{}': missing field 'preset'", obj)))?;
        Ok(Self {
            reference: PathBuf::from(reference),
            preset: preset.to_string(),
        })
    }

    /// Compares parameters with the previous run, if there was one.
    /// Returns error if alignments cannot be reused, and rerun mode does not allow to discard them.
    fn check_previous(&self, path: &Path, rerun: Rerun) -> Result<(), Error> {
        if !path.exists() {
            return Ok(());
        }
        let old_params = match ext::sys::load_json(path).and_then(|json| Params::load(&json)) {
            Ok(val) => val,
            Err(e) => {
                log::warn!("Cannot load old parameters from {}: {}", ext::fmt::path(path), e.display());
                return Ok(());
            }
        };
        if *self != old_params && rerun != Rerun::All {
            if self.reference != old_params.reference {
                log::error!("Reference has changed ({} -> {})",
                    ext::fmt::path(&old_params.reference), ext::fmt::path(&self.reference));
            }
            if self.preset != old_params.preset {
                log::error!("Mapping preset has changed ({} -> {})", old_params.preset, self.preset);
            }
            return Err(Error::InvalidInput(format!(
                "Existing alignments were produced with different parameters, please rerun with {}",
                "--rerun all".red())));
        }
        Ok(())
    }
}

struct Args {
    input: Option<PathBuf>,
    sample: Option<String>,
    sample_list: Option<PathBuf>,
    primers: Option<PathBuf>,
    reference: Option<PathBuf>,
    output: Option<PathBuf>,

    threads: u16,
    bayes: bool,
    chunks: i64,
    caller: CallerParams,

    rerun: Rerun,
    debug: bool,
    minimap: PathBuf,
    samtools: PathBuf,
    freebayes: PathBuf,
}

impl Default for Args {
    fn default() -> Self {
        Self {
            input: None,
            sample: None,
            sample_list: None,
            primers: None,
            reference: None,
            output: None,

            threads: 30,
            bayes: false,
            chunks: 144679,
            caller: CallerParams::default(),

            rerun: Rerun::None,
            debug: false,
            minimap: PathBuf::from("minimap2"),
            samtools: PathBuf::from("samtools"),
            freebayes: PathBuf::from("freebayes-parallel"),
        }
    }
}

impl Args {
    /// Validate arguments, modifying some, if needed.
    fn validate(mut self) -> Result<Self, Error> {
        self.threads = max(self.threads, 1);
        validate_param!(self.input.is_some(), "Input directory is not provided (see -i/--input)");
        validate_param!(self.reference.is_some(), "Reference FASTA file is not provided (see -r/--reference)");
        reference::validate_chunks(self.chunks)?;
        self.caller.validate()?;

        let input = self.input.as_ref().unwrap();
        validate_param!(input.is_dir(), "Input directory {} does not exist", ext::fmt::path(input));
        let reference = absolute(self.reference.as_ref().unwrap())?;
        validate_param!(reference.is_file(), "Reference file {} does not exist", ext::fmt::path(&reference));
        self.reference = Some(reference);
        if let Some(primers) = &self.primers {
            validate_param!(primers.is_file(), "Primer file {} does not exist", ext::fmt::path(primers));
        }
        if let Some(list) = &self.sample_list {
            validate_param!(list.is_file(), "Sample list {} does not exist", ext::fmt::path(list));
        }

        self.minimap = ext::sys::find_exe(self.minimap)?;
        self.samtools = ext::sys::find_exe(self.samtools)?;
        if self.bayes {
            self.freebayes = ext::sys::find_exe(self.freebayes)?;
        }
        Ok(self)
    }

    /// Sample filter from `--sample` and `--sample-list`, if any of them is provided.
    fn sample_filter(&self) -> Result<Option<SampleFilter>, Error> {
        if self.sample.is_none() && self.sample_list.is_none() {
            return Ok(None);
        }
        let mut filter = SampleFilter::default();
        if let Some(name) = &self.sample {
            filter.insert(name.clone());
        }
        if let Some(list) = &self.sample_list {
            filter.extend_from_file(list)?;
        }
        Ok(Some(filter))
    }
}

/// Converts path into an absolute path without resolving symbolic links.
fn absolute(path: &Path) -> Result<PathBuf, Error> {
    if path.is_absolute() {
        Ok(path.to_owned())
    } else {
        Ok(std::env::current_dir().map_err(add_path!(!))?.join(path))
    }
}

fn print_help() {
    const KEY: usize = 28;
    const VAL: usize = 5;
    const EMPTY: &'static str = str_repeat!(" ", KEY + VAL + 5);

    let defaults = Args::default();
    println!("{}", "Variant calling pipeline for Oxford Nanopore sequencing.".yellow());

    println!("\n{} {} -i input_dir -r reference.fa -o output_dir [arguments]",
        "Usage:".bold(), super::PROGRAM);

    println!("\n{}", "Input/output arguments:".bold());
    println!("    {:KEY$} {:VAL$}  Input directory. Quality-filtered reads ({}) must be\n\
        {EMPTY}  located in {}.",
        "-i, --input".green(), "DIR".yellow(), "HQ_<sample>*.fastq".cyan(), paths::FILTERED_FASTQ.cyan());
    println!("    {:KEY$} {:VAL$}  Analyse only this sample.",
        "-s, --sample".green(), "STR".yellow());
    println!("    {:KEY$} {:VAL$}  Analyse only samples from this file (one per line).",
        "-L, --sample-list".green(), "FILE".yellow());
    println!("    {:KEY$} {:VAL$}  BED file with primers to trim (not used for now).",
        "-p, --primers".green(), "FILE".yellow());
    println!("    {:KEY$} {:VAL$}  Reference FASTA file.",
        "-r, --reference".green(), "FILE".yellow());
    println!("    {:KEY$} {:VAL$}  Output directory.",
        "-o, --output".green(), "DIR".yellow());

    println!("\n{}", "Variant calling:".bold());
    println!("    {:KEY$} {:VAL$}  Call variants with freebayes-parallel.",
        "-B, --bayes".green(), super::flag());
    println!("    {:KEY$} {:VAL$}  Minimal fraction of observations, supporting an alternate allele [{}].",
        "-f, --min-allele-frequency".green(), "FLOAT".yellow(), super::fmt_def_f64(defaults.caller.min_allele_freq));
    println!("    {:KEY$} {:VAL$}  Exclude alleles with base quality under this threshold [{}].",
        "-q, --min-base-quality".green(), "INT".yellow(), super::fmt_def(defaults.caller.min_base_qual));
    println!("    {:KEY$} {:VAL$}  Exclude alignments with mapping quality under this threshold [{}].",
        "-m, --min-mapping-quality".green(), "INT".yellow(), super::fmt_def(defaults.caller.min_mapq));
    println!("    {:KEY$} {:VAL$}  Sample ploidy [{}].",
        "    --ploidy".green(), "INT".yellow(), super::fmt_def(defaults.caller.ploidy));
    println!("    {:KEY$} {:VAL$}  Split reference into this many regions with equal expected\n\
        {EMPTY}  data content, to reduce variance in runtime [{}].",
        "    --chunks".green(), "INT".yellow(), super::fmt_def(defaults.chunks));

    println!("\n{}", "Execution parameters:".bold());
    println!("    {:KEY$} {:VAL$}  Number of threads [{}].",
        "-t, --threads".green(), "INT".yellow(), super::fmt_def(defaults.threads));
    println!("    {:KEY$} {:VAL$}  Rerun mode [{}]. Reuse complete alignments ({}),\n\
        {EMPTY}  or discard them and map again ({}).",
        "    --rerun".green(), "STR".yellow(), super::fmt_def(defaults.rerun), "none".yellow(), "all".yellow());
    println!("    {:KEY$} {:VAL$}  Show debug messages in the console.",
        "    --debug".green(), super::flag());
    println!("    {:KEY$} {:VAL$}  Minimap2 executable [{}].",
        "    --minimap".green(), "EXE".yellow(), super::fmt_def(defaults.minimap.display()));
    println!("    {:KEY$} {:VAL$}  Samtools executable [{}].",
        "    --samtools".green(), "EXE".yellow(), super::fmt_def(defaults.samtools.display()));
    println!("    {:KEY$} {:VAL$}  Freebayes-parallel executable [{}].",
        "    --freebayes".green(), "EXE".yellow(), super::fmt_def(defaults.freebayes.display()));

    println!("\n{}", "Other parameters:".bold());
    println!("    {:KEY$} {:VAL$}  Show this help message.", "-h, --help".green(), "");
    println!("    {:KEY$} {:VAL$}  Show version.", "-V, --version".green(), "");
}

fn parse_args(argv: &[String]) -> Result<Args, lexopt::Error> {
    if argv.is_empty() {
        print_help();
        std::process::exit(1);
    }
    use lexopt::prelude::*;
    let mut args = Args::default();
    let mut parser = lexopt::Parser::from_args(argv);

    while let Some(arg) = parser.next()? {
        match arg {
            Short('i') | Long("input") => args.input = Some(parser.value()?.parse()?),
            Short('s') | Long("sample") => args.sample = Some(parser.value()?.parse()?),
            Short('L') | Long("sample-list") | Long("sample_list") => args.sample_list = Some(parser.value()?.parse()?),
            Short('p') | Long("primers") => args.primers = Some(parser.value()?.parse()?),
            Short('r') | Long("reference") => args.reference = Some(parser.value()?.parse()?),
            Short('o') | Long("output") => args.output = Some(parser.value()?.parse()?),

            Short('B') | Long("bayes") => args.bayes = true,
            Short('f') | Long("min-allele-frequency") | Long("min_allele_frequency") =>
                args.caller.min_allele_freq = parser.value()?.parse()?,
            Short('q') | Long("min-base-quality") | Long("min_base_quality") =>
                args.caller.min_base_qual = parser.value()?.parse()?,
            Short('m') | Long("min-mapping-quality") | Long("min_mapping_quality") =>
                args.caller.min_mapq = parser.value()?.parse()?,
            Long("ploidy") => args.caller.ploidy = parser.value()?.parse()?,
            Long("chunks") => args.chunks = parser.value()?.parse()?,

            Short('t') | Short('@') | Long("threads") => args.threads = parser.value()?.parse()?,
            Long("rerun") => args.rerun = parser.value()?.parse()?,
            Long("debug") => args.debug = true,
            Long("minimap") | Long("minimap2") => args.minimap = parser.value()?.parse()?,
            Long("samtools") => args.samtools = parser.value()?.parse()?,
            Long("freebayes") | Long("freebayes-parallel") => args.freebayes = parser.value()?.parse()?,

            Short('V') | Long("version") => {
                super::print_version();
                std::process::exit(0);
            }
            Short('h') | Long("help") => {
                print_help();
                std::process::exit(0);
            }
            _ => Err(arg.unexpected())?,
        }
    }
    Ok(args)
}

/// Log group name: final component of the output directory.
fn group_name(output: &Path) -> String {
    output.file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_else(|| super::PROGRAM.to_string())
}

/// Logs stage start and finish.
fn stage<T>(name: &str, f: impl FnOnce() -> Result<T, Error>) -> Result<T, Error> {
    log::info!("");
    log::info!("{}", format!("STARTING {}", name).green());
    let start = Instant::now();
    let res = f()?;
    log::info!("{} ({})", format!("FINISHED {}", name).green(), ext::fmt::Duration(start.elapsed()));
    Ok(res)
}

pub(super) fn run(argv: &[String]) -> Result<(), Error> {
    let args = parse_args(argv)?;
    validate_param!(args.output.is_some(), "Output directory is not provided (see -o/--output)");
    let output = absolute(args.output.as_ref().unwrap())?;
    let group = group_name(&output);
    // Logger must be installed before anything else is logged.
    let logger = RunLogger::init(&output.join(paths::LOGS_DIR), &group, args.debug)?;
    let timer = Instant::now();

    log::info!("{}", "############### START VARIANT CALLING ###############".blue());
    log::info!("Log file: {}", ext::fmt::path(logger.filename()));
    log::debug!("Command: {} {}", super::PROGRAM, argv.join(" "));
    let args = args.validate()?;
    let reference = args.reference.as_ref().unwrap();
    let reads_dir = args.input.as_ref().unwrap().join(paths::FILTERED_FASTQ);
    if let Some(primers) = &args.primers {
        log::warn!("Primer file {} is provided, but primer trimming is not performed", ext::fmt::path(primers));
    }

    let layout = stage("OUTPUT LAYOUT", || OutLayout::create(&output))?;
    let params = Params {
        reference: reference.clone(),
        preset: "map-ont".to_string(),
    };
    let params_path = layout.root().join(paths::PARAMS);
    params.check_previous(&params_path, args.rerun)?;
    params.write(&params_path)?;

    let samples = stage("SAMPLE RESOLUTION", || {
        let filter = args.sample_filter()?;
        let (samples, reads) = sample::resolve(&reads_dir, None)?;
        log::info!("Found {} read file(s) in {}", reads.len(), ext::fmt::path(&reads_dir));
        if samples.is_empty() {
            log::warn!("No quality-filtered read files found, there is nothing to map");
        }
        log::info!("{} sample(s) found: {}", samples.len(),
            ext::fmt::list(&samples, 20).cyan());
        let samples = match filter {
            None => {
                log::info!("No samples to filter");
                samples
            }
            Some(filter) => {
                log::debug!("Sample filter contains {} name(s)", filter.len());
                let samples = filter.apply(samples);
                log::info!("{} sample(s) will be analysed: {}", samples.len(),
                    ext::fmt::list(&samples, 20).cyan());
                samples
            }
        };
        Ok(samples)
    })?;

    let mapper = Mapper {
        reference,
        minimap: &args.minimap,
        samtools: &args.samtools,
        threads: args.threads,
        rerun: args.rerun,
    };
    let summary = stage("SAMPLE MAPPING", || mapper.map_all(&samples, &layout))?;
    log::info!("Mapped {} sample(s), reused {} existing alignment(s)", summary.mapped, summary.skipped);

    stage("REFERENCE INDEXING", || reference::ensure_fai(&args.samtools, reference))?;
    let regions = stage("REFERENCE PARTITIONING", ||
        reference::partition(&args.samtools, reference, args.chunks, &summary.bams, &layout.variants_dir()))?;

    if args.bayes {
        let caller = VariantCaller {
            freebayes: &args.freebayes,
            reference,
            regions: &regions,
            threads: args.threads,
            params: &args.caller,
            rerun: args.rerun,
        };
        let n_called = stage("VARIANT CALLING", || caller.call_all(&samples, &layout))?;
        log::info!("Called variants for {} sample(s)", n_called);
    } else {
        log::info!("Variant calling is not requested (see -B/--bayes)");
    }

    log::info!("");
    log::info!("{}", format!("##### END OF ONT VARIANT CALLING PIPELINE: {} sample(s), total time {} #####",
        samples.len(), ext::fmt::Duration(timer.elapsed())).magenta().bold());
    drop(logger);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    fn argv(s: &str) -> Vec<String> {
        s.split_whitespace().map(String::from).collect()
    }

    #[test]
    fn defaults_and_aliases() {
        let args = parse_args(&argv("-i in -r ref.fa -o out/run1 --sample_list list.txt \
            --min_allele_frequency 0.2 -q 9 --min-mapping-quality 20 --chunks -5 -B -t 8")).unwrap();
        assert_eq!(args.input, Some(PathBuf::from("in")));
        assert_eq!(args.sample_list, Some(PathBuf::from("list.txt")));
        assert_eq!(args.caller.min_allele_freq, 0.2);
        assert_eq!(args.caller.min_base_qual, 9);
        assert_eq!(args.caller.min_mapq, 20);
        assert_eq!(args.caller.ploidy, 1);
        assert_eq!(args.chunks, -5);
        assert_eq!(args.threads, 8);
        assert!(args.bayes);
        assert_eq!(args.rerun, Rerun::None);
        assert_eq!(group_name(args.output.as_ref().unwrap()), "run1");

        let args = parse_args(&argv("-i in -r ref.fa -o out")).unwrap();
        assert_eq!(args.threads, 30);
        assert_eq!(args.chunks, 144679);
        assert_eq!(args.caller.min_allele_freq, 0.1);
        assert!(!args.bayes);
    }

    #[test]
    fn unknown_argument() {
        assert!(parse_args(&argv("-i in --unknown")).is_err());
        assert!(parse_args(&argv("--rerun sometimes")).is_err());
    }

    #[test]
    fn invalid_chunks_rejected_before_tools() {
        let dir = tempfile::tempdir().unwrap();
        let reference = dir.path().join("ref.fa");
        fs::write(&reference, ">chr\nACGT\n").unwrap();
        let mut args = Args::default();
        args.input = Some(dir.path().to_owned());
        args.reference = Some(reference);
        args.chunks = 0;
        // Executables are not checked, as the chunk count is invalid.
        args.samtools = PathBuf::from("/nonexistent/samtools");
        assert!(matches!(args.validate(), Err(Error::InvalidInput(_))));
    }

    #[test]
    fn missing_paths() {
        let dir = tempfile::tempdir().unwrap();
        let mut args = Args::default();
        args.input = Some(dir.path().join("absent"));
        args.reference = Some(dir.path().join("ref.fa"));
        assert!(matches!(args.validate(), Err(Error::InvalidInput(_))));
    }

    #[test]
    fn sample_filter_from_args() {
        let dir = tempfile::tempdir().unwrap();
        let list = dir.path().join("list.txt");
        fs::write(&list, "S3\nS4\n").unwrap();
        let mut args = Args::default();
        assert!(args.sample_filter().unwrap().is_none());
        args.sample = Some("S1".to_string());
        args.sample_list = Some(list);
        assert_eq!(args.sample_filter().unwrap().unwrap().len(), 3);
    }

    #[test]
    fn changed_params() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(paths::PARAMS);
        let params = Params { reference: PathBuf::from("/ref/a.fa"), preset: "map-ont".to_string() };
        params.check_previous(&path, Rerun::None).unwrap();
        params.write(&path).unwrap();
        assert_eq!(Params::load(&ext::sys::load_json(&path).unwrap()).unwrap(), params);
        params.check_previous(&path, Rerun::None).unwrap();
        assert!(params.write(&dir.path().join("missing").join(paths::PARAMS)).is_err());

        let new_params = Params { reference: PathBuf::from("/ref/b.fa"), preset: "map-ont".to_string() };
        assert!(matches!(new_params.check_previous(&path, Rerun::None), Err(Error::InvalidInput(_))));
        new_params.check_previous(&path, Rerun::All).unwrap();
    }
}
