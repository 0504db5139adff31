//! Genomic sites and the persisted site list.

use std::fmt;
use std::fs::File;
use std::io::{BufWriter, Write};
use std::str::FromStr;
use std::collections::HashMap;
use itertools::Itertools;

use crate::common::FileReader;
use crate::errors::{Result, UmiError};

/// A chromosome and 0-based start coordinate, written as `chr1:1000`.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Site {
	pub chrom: String,
	pub start: u64
}

impl Site {
	pub fn new(chrom: &str, start: u64) -> Site {
		Site { chrom: chrom.into(), start }
	}
}

impl fmt::Display for Site {
	fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
		write!(f, "{}:{}", self.chrom, self.start)
	}
}

impl FromStr for Site {
	type Err = UmiError;

	fn from_str(s: &str) -> Result<Site> {
		let invalid = |reason: &str| UmiError::InvalidSite {
			text: s.into(), reason: reason.into()
		};
		// Chromosome names may contain colons (e.g. HLA contigs), so split
		// at the last one.
		let colon = s.rfind(':').ok_or_else(|| invalid("expected chrom:start"))?;
		let (chrom, start) = (&s[..colon], &s[colon + 1..]);
		if chrom.is_empty() { return Err(invalid("missing chromosome")); }
		let start = start.parse().map_err(|_| invalid("start must be a non-negative integer"))?;
		Ok(Site::new(chrom, start))
	}
}

// Sites by descending read count. Equal counts keep chromosome/coordinate
// order so the list is identical between runs.
pub fn select_top_sites(counts: HashMap<Site, u64>, n: usize) -> Vec<(Site, u64)> {
	counts.into_iter()
		.sorted_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.cmp(&b.0)))
		.take(n)
		.collect()
}

pub fn write_site_list(path: &str, sites: &[(Site, u64)]) -> Result<()> {
	let mut out = BufWriter::new(File::create(path)?);
	for (site, count) in sites {
		writeln!(out, "{}\t{}", site, count)?;
	}
	out.flush()?;
	Ok(())
}

pub fn parse_site_line(line: &str) -> Result<Option<(Site, u64)>> {
	let line = line.trim_end();
	if line.is_empty() || line.starts_with('#') { return Ok(None); }
	let mut cols = line.split('\t');
	let site: Site = cols.next().unwrap_or("").parse()?;
	let count = match cols.next() {
		Some(count) => count.parse().map_err(|_| UmiError::InvalidSite {
			text: line.into(), reason: "read count must be an integer".into()
		})?,
		None => 0
	};
	Ok(Some((site, count)))
}

pub fn read_site_list(path: &str) -> Result<Vec<(Site, u64)>> {
	let mut reader = FileReader::new(path);
	let mut line = String::new();
	let mut sites = Vec::new();
	let mut line_num = 0;
	while reader.read_line(&mut line) {
		line_num += 1;
		let parsed = parse_site_line(&line).map_err(|e| UmiError::InvalidLine {
			path: path.into(), line: line_num, reason: e.to_string()
		})?;
		if let Some(entry) = parsed { sites.push(entry); }
	}
	Ok(sites)
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn site_round_trips_through_text() {
		let site: Site = "chr1:1000".parse().unwrap();
		assert_eq!(site, Site::new("chr1", 1000));
		assert_eq!(site.to_string(), "chr1:1000");

		let hla: Site = "HLA-A*01:01:01:01:250".parse().unwrap();
		assert_eq!(hla.chrom, "HLA-A*01:01:01:01");
		assert_eq!(hla.start, 250);
	}

	#[test]
	fn malformed_sites_are_rejected() {
		assert!("chr1".parse::<Site>().is_err());
		assert!(":100".parse::<Site>().is_err());
		assert!("chr1:-5".parse::<Site>().is_err());
		assert!("chr1:12ab".parse::<Site>().is_err());
	}

	#[test]
	fn top_sites_by_count_with_stable_ties() {
		let mut counts = HashMap::new();
		counts.insert(Site::new("chr2", 500), 7);
		counts.insert(Site::new("chr1", 900), 7);
		counts.insert(Site::new("chr1", 100), 30);
		counts.insert(Site::new("chr3", 1), 2);

		let top = select_top_sites(counts, 3);
		assert_eq!(top, vec![(Site::new("chr1", 100), 30),
			(Site::new("chr1", 900), 7), (Site::new("chr2", 500), 7)]);
	}

	#[test]
	fn site_list_file_is_byte_stable() {
		let dir = tempfile::tempdir().unwrap();
		let first = dir.path().join("first.tsv");
		let second = dir.path().join("second.tsv");

		let counts: HashMap<Site, u64> = (0..50u64)
			.map(|k| (Site::new(if k % 2 == 0 { "chr1" } else { "chr2" }, k * 10), k % 7))
			.collect();
		write_site_list(first.to_str().unwrap(), &select_top_sites(counts.clone(), 20)).unwrap();
		write_site_list(second.to_str().unwrap(), &select_top_sites(counts, 20)).unwrap();

		let a = std::fs::read(&first).unwrap();
		let b = std::fs::read(&second).unwrap();
		assert_eq!(a, b);

		let sites = read_site_list(first.to_str().unwrap()).unwrap();
		assert_eq!(sites.len(), 20);
		assert!(sites.windows(2).all(|w| w[0].1 >= w[1].1));
	}

	#[test]
	fn site_lines_without_counts_are_accepted() {
		assert_eq!(parse_site_line("chrX:42\n").unwrap(), Some((Site::new("chrX", 42), 0)));
		assert_eq!(parse_site_line("\n").unwrap(), None);
		assert!(parse_site_line("chrX:42\tmany").is_err());
	}
}
