//! Access to the aligned reads that start at a site.

use std::fs::File;
use bio::io::fasta;
use log::debug;
use rust_htslib::bam::{self, Read};
use rust_htslib::bam::record::{Cigar, Record};
use thiserror::Error;

use crate::basecall::{PaddedAlignment, GAP, MATCH};
use crate::errors::{Result, UmiError};
use crate::site::Site;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum PaddingError {
	#[error("no reference genome loaded")]
	NoReference,

	#[error("CIGAR extends past the read or reference")]
	Overrun,

	#[error("CIGAR covers {covered} of {len} read bases")]
	Unconsumed { covered: usize, len: usize }
}

pub struct AlignmentRecord {
	pub start: u64,
	pub name: String,
	pub sequence: Vec<u8>,
	pub padded: std::result::Result<PaddedAlignment, PaddingError>
}

pub trait AlignmentSource {
	/// All usable records whose alignment starts exactly at the site.
	fn fetch_site(&mut self, site: &Site) -> Result<Vec<AlignmentRecord>>;
}

pub struct BamAlignmentSource {
	bam: bam::IndexedReader,
	genome: Option<fasta::IndexedReader<File>>,
	genome_path: String,
	min_mapq: u8
}

impl BamAlignmentSource {
	// Without a reference genome, records carry only name and sequence.
	// That is enough for counting reads per UMI.
	pub fn open(bam_path: &str, genome_path: Option<&str>, min_mapq: u8) -> Result<BamAlignmentSource> {
		let bam = bam::IndexedReader::from_path(bam_path)?;
		let genome = match genome_path {
			Some(path) => Some(fasta::IndexedReader::from_file(&path).map_err(|e|
				UmiError::Reference { path: path.into(), reason: e.to_string() })?),
			None => None
		};
		Ok(BamAlignmentSource {
			bam, genome, genome_path: genome_path.unwrap_or("").into(), min_mapq
		})
	}

	fn usable(&self, read: &Record, site: &Site) -> bool {
		if read.is_unmapped() || read.is_secondary() || read.is_supplementary() { return false; }
		if read.is_quality_check_failed() { return false; }
		read.pos() >= 0 && read.pos() as u64 == site.start && read.mapq() >= self.min_mapq
	}

	fn reference(genome: &mut fasta::IndexedReader<File>, genome_path: &str,
		chrom: &str, start: u64, end: u64) -> Result<Vec<u8>> {
		let mut seq = Vec::new();
		genome.fetch(chrom, start, end)
			.and_then(|_| genome.read(&mut seq))
			.map_err(|e| UmiError::Reference {
				path: genome_path.into(), reason: e.to_string()
			})?;
		Ok(seq)
	}
}

impl AlignmentSource for BamAlignmentSource {
	fn fetch_site(&mut self, site: &Site) -> Result<Vec<AlignmentRecord>> {
		let tid = self.bam.header().tid(site.chrom.as_bytes())
			.ok_or_else(|| UmiError::UnknownContig(site.chrom.clone()))?;
		self.bam.fetch((tid, site.start as i64, site.start as i64 + 1))?;

		let mut reads: Vec<Record> = Vec::new();
		let mut record = Record::new();
		while let Some(r) = self.bam.read(&mut record) {
			r?;
			if self.usable(&record, site) { reads.push(record.clone()); }
		}

		if reads.is_empty() { return Ok(Vec::new()); }
		let genome = match self.genome.as_mut() {
			Some(genome) => genome,
			None => return Ok(reads.iter().map(|read| AlignmentRecord {
				start: site.start,
				name: String::from_utf8_lossy(read.qname()).into_owned(),
				sequence: read.seq().as_bytes(),
				padded: Err(PaddingError::NoReference)
			}).collect())
		};
		let end = reads.iter().map(|r| r.cigar().end_pos() as u64).max().unwrap_or(site.start);
		let reference = BamAlignmentSource::reference(genome, &self.genome_path,
			&site.chrom, site.start, end)?;
		debug!("Fetched {} reads and {} bp of reference at {}.", reads.len(), reference.len(), site);

		let mut records = Vec::with_capacity(reads.len());
		for read in reads {
			let name = String::from_utf8_lossy(read.qname()).into_owned();
			let sequence = read.seq().as_bytes();
			let cigar: Vec<Cigar> = read.cigar().iter().cloned().collect();
			let padded = pad_alignment(&cigar, &sequence, &reference);
			records.push(AlignmentRecord { start: site.start, name, sequence, padded });
		}
		Ok(records)
	}
}

// Renders a CIGAR as a padded (reference, match, query) triple. The
// reference slice starts at the first aligned reference base. Soft-clipped
// bases become reference gaps, so they end up in the leading/trailing gap
// runs that the transducer trims.
pub fn pad_alignment(cigar: &[Cigar], seq: &[u8], reference: &[u8])
	-> std::result::Result<PaddedAlignment, PaddingError> {
	let mut padded = PaddedAlignment::default();
	let mut seq_idx: usize = 0;
	let mut ref_idx: usize = 0;

	for op in cigar {
		match *op {
			Cigar::Match(len) | Cigar::Equal(len) | Cigar::Diff(len) => {
				for _ in 0..len {
					let (r, q) = match (reference.get(ref_idx), seq.get(seq_idx)) {
						(Some(&r), Some(&q)) => (r.to_ascii_uppercase(), q.to_ascii_uppercase()),
						_ => return Err(PaddingError::Overrun)
					};
					padded.reference.push(r);
					padded.matches.push(if r == q { MATCH } else { b' ' });
					padded.query.push(q);
					seq_idx += 1;
					ref_idx += 1;
				}
			},
			Cigar::Ins(len) | Cigar::SoftClip(len) => {
				for _ in 0..len {
					let q = *seq.get(seq_idx).ok_or(PaddingError::Overrun)?;
					padded.reference.push(GAP);
					padded.matches.push(b' ');
					padded.query.push(q.to_ascii_uppercase());
					seq_idx += 1;
				}
			},
			Cigar::Del(len) | Cigar::RefSkip(len) => {
				for _ in 0..len {
					let r = *reference.get(ref_idx).ok_or(PaddingError::Overrun)?;
					padded.reference.push(r.to_ascii_uppercase());
					padded.matches.push(b' ');
					padded.query.push(GAP);
					ref_idx += 1;
				}
			},
			Cigar::HardClip(_) | Cigar::Pad(_) => {}
		}
	}

	if seq_idx != seq.len() {
		return Err(PaddingError::Unconsumed { covered: seq_idx, len: seq.len() });
	}
	Ok(padded)
}

// A small indexed BAM and FASTA pair shared by the BAM-backed tests. Reads
// on chr1 (all 4 bp): r98 at 98, then at 100 the usable reads ok1 (MAPQ 60,
// matches the reference) and ok2 (MAPQ 30, one mismatch), a secondary, a
// supplementary, a QC-failed and a MAPQ 5 read. One unmapped read sits at
// the end of the file.
#[cfg(test)]
pub fn write_test_bam(dir: &std::path::Path) -> (String, String) {
	use std::io::Write;
	use rust_htslib::bam::record::CigarString;

	let reference: Vec<u8> = b"ACGT".iter().cycle().take(400).cloned().collect();
	let genome_path = dir.join("genome.fa");
	let mut fa = File::create(&genome_path).unwrap();
	fa.write_all(b">chr1\n").unwrap();
	fa.write_all(&reference).unwrap();
	fa.write_all(b"\n").unwrap();
	let mut fai = File::create(dir.join("genome.fa.fai")).unwrap();
	write!(fai, "chr1\t400\t6\t400\t401\n").unwrap();

	let mut header = bam::Header::new();
	let mut sq = bam::header::HeaderRecord::new(b"SQ");
	sq.push_tag(b"SN", "chr1");
	sq.push_tag(b"LN", 400);
	header.push_record(&sq);

	let bam_path = dir.join("reads.bam");
	{
		let mut writer = bam::Writer::from_path(&bam_path, &header, bam::Format::Bam).unwrap();
		let cigar = CigarString(vec![Cigar::Match(4)]);
		let qual = [30u8; 4];
		let mapped = |name: &str, pos: i64, seq: &[u8], mapq: u8| {
			let mut r = Record::new();
			r.set(name.as_bytes(), Some(&cigar), seq, &qual);
			r.set_tid(0);
			r.set_pos(pos);
			r.set_mtid(-1);
			r.set_mpos(-1);
			r.set_mapq(mapq);
			r
		};

		writer.write(&mapped("r98", 98, b"GTAC", 60)).unwrap();
		writer.write(&mapped("ok1 UMI:AAAAAAAAAA", 100, b"ACGT", 60)).unwrap();
		writer.write(&mapped("ok2 UMI:CCCCCCCCCC", 100, b"ACTT", 30)).unwrap();
		let mut r = mapped("sec", 100, b"ACGT", 60);
		r.set_secondary();
		writer.write(&r).unwrap();
		let mut r = mapped("supp", 100, b"ACGT", 60);
		r.set_supplementary();
		writer.write(&r).unwrap();
		let mut r = mapped("qcfail", 100, b"ACGT", 60);
		r.set_quality_check_failed();
		writer.write(&r).unwrap();
		writer.write(&mapped("lowmapq", 100, b"ACGT", 5)).unwrap();

		let mut r = Record::new();
		r.set(b"unmapped", None, b"ACGT", &qual);
		r.set_tid(-1);
		r.set_pos(-1);
		r.set_mtid(-1);
		r.set_mpos(-1);
		r.set_unmapped();
		writer.write(&r).unwrap();
	}
	bam::index::build(&bam_path, None, bam::index::Type::Bai, 1).unwrap();

	(bam_path.to_string_lossy().into_owned(), genome_path.to_string_lossy().into_owned())
}
