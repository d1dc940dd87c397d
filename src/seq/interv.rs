use std::{
    fmt,
    rc::Rc,
};
use crate::seq::contigs::{ContigId, Contigs};

/// Genomic interval, 0-based, half-open.
#[derive(Clone)]
pub struct Interval {
    contigs: Rc<Contigs>,
    contig_id: ContigId,
    start: u32,
    end: u32,
}

impl Interval {
    /// Create a new interval from contigs, contig id, start and end.
    pub fn new(contigs: Rc<Contigs>, contig_id: ContigId, start: u32, end: u32) -> Self {
        assert!(contig_id.ix() < contigs.len(),
            "Cannot create interval with id {}, when there are {} contigs in total",
            contig_id.ix(), contigs.len());
        assert!(start < end && end <= contigs.get_len(contig_id),
            "Cannot create interval {}:{}-{}", contig_id, start, end);
        Self { contigs, contig_id, start, end }
    }

    /// Contig id.
    #[inline]
    pub fn contig_id(&self) -> ContigId {
        self.contig_id
    }

    /// Contig name.
    #[inline]
    pub fn contig_name(&self) -> &str {
        self.contigs.get_name(self.contig_id)
    }

    /// Interval start.
    #[inline]
    pub fn start(&self) -> u32 {
        self.start
    }

    /// Interval end.
    #[inline]
    pub fn end(&self) -> u32 {
        self.end
    }

    /// Get interval length.
    #[inline]
    pub fn len(&self) -> u32 {
        self.end - self.start
    }
}

/// Formats interval as `name:start-end` with 0-based start, as accepted by freebayes `--region`.
impl fmt::Display for Interval {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}:{}-{}", self.contig_name(), self.start, self.end)
    }
}

impl fmt::Debug for Interval {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        fmt::Display::fmt(self, f)
    }
}
