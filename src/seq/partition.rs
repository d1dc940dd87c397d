//! Split the reference into consecutive region sets with approximately equal expected load.

use std::{
    io::Write,
    path::{Path, PathBuf},
    rc::Rc,
};
use htslib::bam::{self, Read as BamRead};
use crate::{
    Error,
    err::validate_param,
    ext,
    seq::{Contigs, ContigId, Interval},
};

/// Every contig receives at least this fraction of the mean load density,
/// so that contigs without mapped reads are still split into finite chunks.
const MIN_REL_DENSITY: f64 = 0.01;

/// Expected load per base pair for each contig.
#[derive(Clone, Debug)]
pub struct LoadProfile {
    densities: Vec<f64>,
}

impl LoadProfile {
    /// Every base pair carries the same load.
    pub fn uniform(contigs: &Contigs) -> Self {
        Self {
            densities: vec![1.0; contigs.len()],
        }
    }

    /// Load density is proportional to the number of reads, mapped to the contig, divided by contig length.
    /// Falls back to the uniform profile if there are no mapped reads.
    pub fn from_mapped_counts(contigs: &Contigs, counts: &[u64]) -> Self {
        assert_eq!(contigs.len(), counts.len(), "Number of contigs and mapped counts do not match");
        let total_reads: u64 = counts.iter().sum();
        let genome_size = contigs.genome_size();
        if total_reads == 0 || genome_size == 0 {
            return Self::uniform(contigs);
        }
        let mean_density = total_reads as f64 / genome_size as f64;
        let min_density = MIN_REL_DENSITY * mean_density;
        let densities = contigs.lengths().zip(counts)
            .map(|(len, &count)| if len == 0 { min_density } else { count as f64 / f64::from(len) + min_density })
            .collect();
        Self { densities }
    }

    /// Sums mapped read counts over BAM index statistics (same as `samtools idxstats`),
    /// and creates the load profile from them.
    pub fn from_bams(contigs: &Contigs, bams: &[PathBuf]) -> Result<Self, Error> {
        let mut counts = vec![0_u64; contigs.len()];
        for filename in bams {
            let mut reader = bam::IndexedReader::from_path(filename)?;
            let stats = reader.index_stats()?;
            let header = reader.header().clone();
            for (tid, _len, mapped, _unmapped) in stats {
                if tid < 0 || mapped == 0 {
                    continue;
                }
                let name = String::from_utf8_lossy(header.tid2name(tid as u32));
                match contigs.try_get_id(&name) {
                    Some(id) => counts[id.ix()] += mapped,
                    None => log::warn!("    Contig {} from {} is absent from the reference, ignoring it",
                        name, ext::fmt::path(filename)),
                }
            }
        }
        log::debug!("    Loaded {} mapped reads from {} BAM index(es)", counts.iter().sum::<u64>(), bams.len());
        Ok(Self::from_mapped_counts(contigs, &counts))
    }

    #[inline]
    pub fn density(&self, id: ContigId) -> f64 {
        self.densities[id.ix()]
    }
}

/// Ordered sequence of region sets. Together, the sets cover every reference position exactly once.
pub struct RegionPartition {
    sets: Vec<Vec<Interval>>,
}

impl RegionPartition {
    /// Splits the reference into `n_chunks` consecutive chunks with approximately equal total load.
    /// Each chunk contains at least one base pair; chunks, spanning several contigs, consist of several regions.
    pub fn balanced(contigs: &Rc<Contigs>, profile: &LoadProfile, n_chunks: u64) -> Result<Self, Error> {
        let genome_size = contigs.genome_size();
        validate_param!(n_chunks > 0, "Number of chunks must be positive");
        validate_param!(n_chunks <= genome_size,
            "Number of chunks ({}) exceeds the reference length ({} bp)", n_chunks, genome_size);
        let cuts = find_cuts(contigs, profile, n_chunks);
        Ok(Self {
            sets: split_by_contigs(contigs, &cuts),
        })
    }

    /// Number of region sets.
    pub fn len(&self) -> usize {
        self.sets.len()
    }

    pub fn sets(&self) -> &[Vec<Interval>] {
        &self.sets
    }

    /// Iterates over all regions in all sets.
    pub fn regions(&self) -> impl Iterator<Item = &Interval> {
        self.sets.iter().flatten()
    }

    /// Writes one region per line (`name:start-end`), sets follow each other in order.
    pub fn write_regions(&self, mut f: impl Write) -> std::io::Result<()> {
        for region in self.regions() {
            writeln!(f, "{}", region)?;
        }
        f.flush()
    }

    /// Writes regions into a temporary file and then renames it, so that incomplete files never appear.
    pub fn save(&self, filename: &Path) -> Result<(), Error> {
        let tmp_filename = ext::sys::append_path(filename, ".tmp");
        let mut f = ext::sys::create_file(&tmp_filename)?;
        self.write_regions(&mut f).map_err(crate::err::add_path!(tmp_filename))?;
        drop(f);
        std::fs::rename(&tmp_filename, filename).map_err(crate::err::add_path!(tmp_filename, filename))
    }
}

/// Returns `n_chunks + 1` strictly increasing positions in the concatenated reference coordinates,
/// starting at 0 and ending at the genome size.
fn find_cuts(contigs: &Contigs, profile: &LoadProfile, n_chunks: u64) -> Vec<u64> {
    let genome_size = contigs.genome_size();
    let total_load: f64 = contigs.ids().map(|id| profile.density(id) * f64::from(contigs.get_len(id))).sum();

    let mut cuts = Vec::with_capacity(n_chunks as usize + 1);
    cuts.push(0);
    // Index of the current contig, its global offset and the cumulative load before it.
    let mut i = 0;
    let mut offset = 0_u64;
    let mut load_before = 0.0_f64;
    for k in 1..n_chunks {
        let target = total_load * k as f64 / n_chunks as f64;
        while i + 1 < contigs.len() {
            let id = ContigId::new(i);
            let contig_load = profile.density(id) * f64::from(contigs.get_len(id));
            if load_before + contig_load > target {
                break;
            }
            load_before += contig_load;
            offset += u64::from(contigs.get_len(id));
            i += 1;
        }
        let density = profile.density(ContigId::new(i));
        let pos = offset + ((target - load_before) / density).round().max(0.0) as u64;
        let prev = *cuts.last().unwrap();
        cuts.push(pos.clamp(prev + 1, genome_size - (n_chunks - k)));
    }
    cuts.push(genome_size);
    cuts
}

/// Converts consecutive global ranges `[cuts[k], cuts[k + 1])` into sets of intervals, one per overlapping contig.
/// Contigs and cuts are traversed together, once.
fn split_by_contigs(contigs: &Rc<Contigs>, cuts: &[u64]) -> Vec<Vec<Interval>> {
    let mut sets = Vec::with_capacity(cuts.len().saturating_sub(1));
    // Current contig, and its global start.
    let mut i = 0;
    let mut offset = 0_u64;
    for w in cuts.windows(2) {
        let (start, end) = (w[0], w[1]);
        let mut set = Vec::new();
        while i < contigs.len() {
            let id = ContigId::new(i);
            let contig_end = offset + u64::from(contigs.get_len(id));
            let a = start.max(offset);
            let b = end.min(contig_end);
            if a < b {
                set.push(Interval::new(Rc::clone(contigs), id, (a - offset) as u32, (b - offset) as u32));
            }
            if contig_end > end {
                break;
            }
            // Contig ends within the range, next range starts on a later contig.
            offset = contig_end;
            i += 1;
        }
        sets.push(set);
    }
    sets
}

#[cfg(test)]
mod tests {
    use super::*;

    fn make_contigs(lengths: &[u32]) -> Rc<Contigs> {
        Rc::new(Contigs::new("test".to_string(),
            lengths.iter().enumerate().map(|(i, &len)| (format!("chr{}", i + 1), len))).unwrap())
    }

    /// Checks that every position is covered exactly once, and that the sets are consecutive.
    fn assert_disjoint_cover(partition: &RegionPartition, contigs: &Contigs) {
        let mut expected_contig = 0;
        let mut expected_start = 0;
        for region in partition.regions() {
            if region.start() == 0 && region.contig_id().ix() != expected_contig {
                assert_eq!(expected_start, contigs.get_len(ContigId::new(expected_contig)),
                    "Contig {} is not fully covered", expected_contig);
                expected_contig += 1;
                expected_start = 0;
            }
            assert_eq!(region.contig_id().ix(), expected_contig, "Unexpected region {}", region);
            assert_eq!(region.start(), expected_start, "Gap or overlap before region {}", region);
            assert!(region.len() > 0);
            expected_start = region.end();
            if expected_start == contigs.get_len(region.contig_id()) {
                expected_contig += 1;
                expected_start = 0;
            }
        }
        assert_eq!(expected_contig, contigs.len());
        assert_eq!(partition.regions().map(|r| u64::from(r.len())).sum::<u64>(), contigs.genome_size());
        for set in partition.sets() {
            assert!(!set.is_empty());
        }
    }

    #[test]
    fn disjoint_cover() {
        for lengths in [&[1000][..], &[1][..], &[7, 3, 11][..], &[500, 1, 1, 250, 4411][..]] {
            let contigs = make_contigs(lengths);
            let genome_size = contigs.genome_size();
            let profiles = [
                LoadProfile::uniform(&contigs),
                LoadProfile::from_mapped_counts(&contigs,
                    &(0..contigs.len() as u64).map(|i| 10 * i * i + 1).collect::<Vec<_>>()),
            ];
            for profile in profiles.iter() {
                for n in [1, 2, 3, 5, 17, 100, genome_size / 2, genome_size - 1, genome_size] {
                    if n == 0 || n > genome_size {
                        continue;
                    }
                    let partition = RegionPartition::balanced(&contigs, profile, n).unwrap();
                    assert_eq!(partition.len() as u64, n);
                    assert_disjoint_cover(&partition, &contigs);
                }
            }
        }
    }

    #[test]
    fn uniform_chunks_are_equal() {
        let contigs = make_contigs(&[600, 400]);
        let partition = RegionPartition::balanced(&contigs, &LoadProfile::uniform(&contigs), 10).unwrap();
        for set in partition.sets() {
            assert_eq!(set.iter().map(Interval::len).sum::<u32>(), 100);
        }
        // Sets never span contig boundary here, as 600 is divisible by 100.
        assert!(partition.sets().iter().all(|set| set.len() == 1));
    }

    #[test]
    fn chunk_spanning_contigs() {
        let contigs = make_contigs(&[150, 50]);
        let partition = RegionPartition::balanced(&contigs, &LoadProfile::uniform(&contigs), 2).unwrap();
        let s: Vec<Vec<String>> = partition.sets().iter()
            .map(|set| set.iter().map(Interval::to_string).collect()).collect();
        assert_eq!(s, vec![vec!["chr1:0-100".to_string()], vec!["chr1:100-150".to_string(), "chr2:0-50".to_string()]]);
    }

    #[test]
    fn many_small_contigs() {
        let contigs = make_contigs(&[20_u32; 5000]);
        let profile = LoadProfile::from_mapped_counts(&contigs, &(0..5000_u64).map(|i| i % 7).collect::<Vec<_>>());
        for n in [4999, 5000, 5001, 100_000] {
            let partition = RegionPartition::balanced(&contigs, &profile, n).unwrap();
            assert_eq!(partition.len() as u64, n);
            assert_disjoint_cover(&partition, &contigs);
        }
    }

    #[test]
    fn heavier_contig_gets_more_chunks() {
        // chr1: 100 bp with 900 reads, chr2: 900 bp with 900 reads.
        let contigs = make_contigs(&[100, 900]);
        let profile = LoadProfile::from_mapped_counts(&contigs, &[900, 900]);
        assert!(profile.density(ContigId::new(0)) > 8.0 * profile.density(ContigId::new(1)));
        let partition = RegionPartition::balanced(&contigs, &profile, 4).unwrap();
        let chr1_sets = partition.sets().iter()
            .filter(|set| set.iter().any(|r| r.contig_id().ix() == 0)).count();
        assert!(chr1_sets >= 2);
        assert_disjoint_cover(&partition, &contigs);
    }

    #[test]
    fn no_reads_is_uniform() {
        let contigs = make_contigs(&[10, 20]);
        let profile = LoadProfile::from_mapped_counts(&contigs, &[0, 0]);
        assert_eq!(profile.density(ContigId::new(0)), profile.density(ContigId::new(1)));
    }

    #[test]
    fn invalid_chunk_count() {
        let contigs = make_contigs(&[10, 5]);
        let profile = LoadProfile::uniform(&contigs);
        assert!(matches!(RegionPartition::balanced(&contigs, &profile, 0), Err(Error::InvalidInput(_))));
        assert!(matches!(RegionPartition::balanced(&contigs, &profile, 16), Err(Error::InvalidInput(_))));
        assert!(RegionPartition::balanced(&contigs, &profile, 15).is_ok());
    }

    #[test]
    fn saved_regions() {
        let dir = tempfile::tempdir().unwrap();
        let contigs = make_contigs(&[30]);
        let partition = RegionPartition::balanced(&contigs, &LoadProfile::uniform(&contigs), 3).unwrap();
        let filename = dir.path().join("ref.3.regions");
        partition.save(&filename).unwrap();
        assert_eq!(std::fs::read_to_string(&filename).unwrap(), "chr1:0-10\nchr1:10-20\nchr1:20-30\n");
        assert!(!ext::sys::append_path(&filename, ".tmp").exists());
    }
}
