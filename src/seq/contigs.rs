use std::{
    collections::HashMap,
    fmt,
    path::Path,
};
use bio::io::fasta::Index;
use crate::{
    Error,
    ext,
};

/// Contig identificator - newtype over u32.
/// Can be converted to `usize` using `id.ix()` method.
#[derive(Debug, PartialEq, Eq, PartialOrd, Ord, Clone, Copy, Hash)]
pub struct ContigId(u32);

impl ContigId {
    /// Creates a new ContigId.
    pub fn new<T>(val: T) -> ContigId
    where T: TryInto<u32>,
          T::Error: fmt::Debug,
    {
        ContigId(val.try_into().expect("Contig ID too large"))
    }

    /// Converts `ContigId` into `usize`.
    #[inline]
    pub fn ix(self) -> usize {
        self.0 as usize
    }
}

impl fmt::Display for ContigId {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "Id({})", self.0)
    }
}

/// Names and lengths of the reference contigs, in the order of the FASTA index.
/// Contig name and lengths can be accessed using `ContigId`.
#[derive(Clone)]
pub struct Contigs {
    tag: String,
    names: Vec<String>,
    lengths: Vec<u32>,
    name_to_id: HashMap<String, ContigId>,
}

impl Contigs {
    /// Create contigs from an iterator over pairs (name, length).
    /// Returns error if names repeat.
    /// First argument: overall name of the contig set.
    pub fn new(tag: String, it: impl Iterator<Item = (String, u32)>) -> Result<Self, Error> {
        let mut names = Vec::new();
        let mut lengths = Vec::new();
        let mut name_to_id = HashMap::new();

        for (name, length) in it {
            let contig_id = ContigId::new(names.len());
            if let Some(prev_id) = name_to_id.insert(name.clone(), contig_id) {
                return Err(Error::InvalidData(format!("Contig {} appears twice in {} ({} and {})",
                    name, tag, prev_id, contig_id)));
            }
            names.push(name);
            lengths.push(length);
        }
        names.shrink_to_fit();
        lengths.shrink_to_fit();
        Ok(Self { tag, names, lengths, name_to_id })
    }

    /// Loads contig names and lengths from a FASTA index (`.fai`).
    pub fn from_fai(tag: String, fai_filename: &Path) -> Result<Self, Error> {
        let index = Index::from_file(&fai_filename)
            .map_err(|e| Error::ParsingError(format!("Cannot load FASTA index {}: {}",
                ext::fmt::path(fai_filename), e)))?;
        let mut names_lengths = Vec::new();
        for seq in index.sequences() {
            let len = u32::try_from(seq.len).map_err(|_| Error::InvalidData(format!(
                "Contig {} is too long ({} bp)", seq.name, seq.len)))?;
            names_lengths.push((seq.name, len));
        }
        Self::new(tag, names_lengths.into_iter())
    }

    /// Get the number of contigs.
    pub fn len(&self) -> usize {
        self.names.len()
    }

    /// Get contig name from an id.
    pub fn get_name(&self, id: ContigId) -> &str {
        &self.names[id.ix()]
    }

    /// Get contig length from an id.
    pub fn get_len(&self, id: ContigId) -> u32 {
        self.lengths[id.ix()]
    }

    /// Returns contig id, if it is available.
    pub fn try_get_id(&self, name: &str) -> Option<ContigId> {
        self.name_to_id.get(name).copied()
    }

    /// Returns iterator over all contig IDs.
    pub fn ids(&self) -> impl Iterator<Item = ContigId> + ExactSizeIterator {
        (0..self.len()).map(ContigId::new)
    }

    /// Returns iterator over all contig lengths.
    pub fn lengths(&self) -> std::iter::Cloned<std::slice::Iter<'_, u32>> {
        self.lengths.iter().cloned()
    }

    /// Total length of all contigs.
    pub fn genome_size(&self) -> u64 {
        self.lengths.iter().map(|&len| u64::from(len)).sum()
    }
}

impl fmt::Debug for Contigs {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "Contigs({}, {} entries)", self.tag, self.names.len())
    }
}

impl fmt::Display for Contigs {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn load_fai() {
        let dir = tempfile::tempdir().unwrap();
        let fai = dir.path().join("ref.fa.fai");
        std::fs::write(&fai, "chr1\t1000\t6\t60\t61\nplasmid\t250\t1029\t60\t61\n").unwrap();
        let contigs = Contigs::from_fai("ref".to_string(), &fai).unwrap();
        assert_eq!(contigs.len(), 2);
        assert_eq!(contigs.genome_size(), 1250);
        let id = contigs.try_get_id("plasmid").unwrap();
        assert_eq!(contigs.get_name(id), "plasmid");
        assert_eq!(contigs.get_len(id), 250);
        assert!(contigs.try_get_id("chr2").is_none());
    }

    #[test]
    fn repeated_names() {
        let res = Contigs::new("ref".to_string(),
            vec![("a".to_string(), 10), ("a".to_string(), 20)].into_iter());
        assert!(matches!(res, Err(Error::InvalidData(_))));
    }
}
