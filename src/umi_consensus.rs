use crate::common::{parse_args, parse_option, PathArgs, GzipWriter};
use crate::alignment::{AlignmentRecord, AlignmentSource, BamAlignmentSource};
use crate::barcode::{BarcodeExtractor, BarcodeMatch, Umi};
use crate::basecall::{transduce, CallString, Symbol};
use crate::consensus::ConsensusVoter;
use crate::family::FamilyAggregator;
use crate::position::{aggregate, PositionRow};
use crate::site::Site;
use crate::targets::{AmpliconTable, BarcodeMask};
use crate::umi_select_sites::{load_or_select_sites, SamplingSettings};
use std::path::Path;
use std::ops::AddAssign;
use itertools::Itertools;
use log::{debug, info, warn};

const USAGE: &str = "
Usage:
  umi consensus [options] <bam_file> <genome.fa> <sites.tsv> <out_dir>

Options:
  --sample=NAME         Prefix for output files [default: BAM file name]
  --min-depth=LIST      Comma-separated minimum UMI family sizes for
                        consensus. Each size gives its own consensus and
                        position table. Size 0 reports uncollapsed
                        depths [default: 3]
  --min-mapq=N          Only use reads with MAPQ >= threshold [default: 0]
  --umi-tag=TOKEN       Read name marker preceding the UMI [default: UMI:]
  --umi-len=N           UMI length in bases [default: 10]
  --inline-pattern=PAT  Find UMIs in the read sequence instead, using a
                        pattern where N marks UMI bases (e.g. NNNNNNNNNNTGA)
  --inline-window=N     Number of leading read bases searched for an inline
                        UMI [default: 20]
  --mask=FILE           Barcode mask file listing invalid amplicon + UMI
                        combinations
  --targets=BED         Amplicon regions (chrom, start, end, name)
  --uid-depth-only      Only count reads per UMI, do not call consensus
  --single-site         Stop after the first site (for debugging)
  --top-sites=N         Sites to select if <sites.tsv> is missing [default: 100]
  --sample-fraction=F   Fraction of alignments sampled when selecting
                        sites [default: 0.1]
  --seed=N              Random seed for site selection [default: 1]

Groups reads that start at each site into UMI families, calls a majority
vote consensus for every family with at least --min-depth reads, and writes
per-position raw and consensus depths with the minimum and mean size of the
families behind each consensus depth. The BAM file must be position-sorted
and indexed, and the reference genome FASTA must be indexed.

Sites are read from <sites.tsv>. If the file does not exist, sites are
selected from the BAM file as with 'umi select sites' and the list is saved
for later runs.

Output files (gzip-compressed) in <out_dir>:
  <sample>.uid_depth.tsv.gz    site, UMI, read count
  <sample>.consensus.tsv.gz    site, min family size, UMI, family size,
                               consensus
  <sample>.positions.tsv.gz    raw and consensus depths per position and
                               min family size

Positions whose raw depth is below 10% of the highest raw depth at the same
site are not reported.
";

pub struct Settings {
	pub min_depths: Vec<u32>,
	pub uid_depth_only: bool,
	pub single_site: bool
}

#[derive(Default, Clone, Copy)]
pub struct Stats {
	pub reads: usize,
	pub no_barcode: usize,
	pub masked: usize,
	pub alignment_errors: usize,
	pub transducer_errors: usize,
	pub families: usize,
	pub consensus_families: usize
}

impl AddAssign for Stats {
	fn add_assign(&mut self, other: Stats) {
		self.reads += other.reads;
		self.no_barcode += other.no_barcode;
		self.masked += other.masked;
		self.alignment_errors += other.alignment_errors;
		self.transducer_errors += other.transducer_errors;
		self.families += other.families;
		self.consensus_families += other.consensus_families;
	}
}

// Everything the engine knows about one site. Built from scratch for
// every site and dropped after it has been written out.
pub struct SiteContext<'a> {
	pub site: &'a Site,
	pub alias: Option<&'a str>,
	pub families: FamilyAggregator,
	pub stats: Stats
}

pub struct ConsensusLine {
	pub umi: Umi,
	pub family_size: u32,
	pub consensus: String
}

// Consensus strings and position rows for one minimum family size.
pub struct CollapsedSite {
	pub min_depth: u32,
	pub consensus: Vec<ConsensusLine>,
	pub positions: Vec<PositionRow>
}

pub struct SiteResult {
	pub uid_depths: Vec<(Umi, u32)>,
	pub collapsed: Vec<CollapsedSite>,
	pub threshold: u32,
	pub stats: Stats
}

impl<'a> SiteContext<'a> {
	pub fn new(site: &'a Site, alias: Option<&'a str>) -> SiteContext<'a> {
		SiteContext { site, alias, families: FamilyAggregator::default(), stats: Stats::default() }
	}

	pub fn add_read(&mut self, read: &AlignmentRecord, extractor: &BarcodeExtractor,
		mask: &BarcodeMask, settings: &Settings) {

		if read.start != self.site.start { return; }
		self.stats.reads += 1;

		let umi = match extractor.extract(&read.name, &read.sequence) {
			BarcodeMatch::Found(_, umi) => umi,
			BarcodeMatch::NotFound => { self.stats.no_barcode += 1; return; }
		};

		// Masked barcodes still count towards read depth per UMI when
		// that is all we are asked for.
		let amplicon = match self.alias {
			Some(alias) => alias.to_string(),
			None => self.site.to_string()
		};
		if !settings.uid_depth_only && mask.is_masked(&amplicon, &umi) {
			self.stats.masked += 1;
			return;
		}

		self.families.count_uid(&umi);
		if settings.uid_depth_only { return; }

		let padded = match &read.padded {
			Ok(padded) => padded,
			Err(e) => {
				warn!("Skipping read {} at {}: {}", read.name, self.site, e);
				self.stats.alignment_errors += 1;
				return;
			}
		};
		match transduce(padded) {
			Ok(calls) => self.families.add(umi, calls),
			Err(e) => {
				warn!("Skipping read {} at {}: {}", read.name, self.site, e);
				self.stats.transducer_errors += 1;
			}
		}
	}

	pub fn finish(mut self, voters: &[ConsensusVoter]) -> SiteResult {
		let uid_depths = self.families.uid_depths().into_iter()
			.map(|(umi, n)| (umi.clone(), n)).collect();
		self.stats.families = self.families.len();

		let collapsed: Vec<CollapsedSite> = voters.iter().map(|voter| {
			let (table, calls) = aggregate(&self.families, voter);
			let consensus = calls.into_iter().map(|c| ConsensusLine {
				umi: c.umi.into(), family_size: c.family_size,
				consensus: CallString(&c.calls).to_string()
			}).collect();
			CollapsedSite {
				min_depth: voter.min_depth(), consensus, positions: table.rows(self.site)
			}
		}).collect();
		self.stats.consensus_families = collapsed.iter()
			.map(|c| c.consensus.len()).max().unwrap_or(0);

		SiteResult {
			uid_depths, collapsed,
			threshold: self.families.raw_positions().reporting_threshold(),
			stats: self.stats
		}
	}
}

pub fn process_site<S: AlignmentSource>(source: &mut S, site: &Site, alias: Option<&str>,
	extractor: &BarcodeExtractor, mask: &BarcodeMask, voters: &[ConsensusVoter],
	settings: &Settings) -> crate::errors::Result<SiteResult> {

	let reads = source.fetch_site(site)?;
	let mut ctx = SiteContext::new(site, alias);
	for read in &reads {
		ctx.add_read(read, extractor, mask, settings);
	}
	drop(reads);
	Ok(ctx.finish(voters))
}

// Sorted and deduplicated, so that output order does not depend on how
// the sizes were listed.
pub fn parse_min_depths(text: &str) -> Option<Vec<u32>> {
	let depths: Option<Vec<u32>> = text.split(',').map(|x| x.trim().parse().ok()).collect();
	let mut depths = depths?;
	depths.sort_unstable();
	depths.dedup();
	Some(depths)
}

struct Outputs {
	uid_depth: Vec<(String, Umi, u32)>,
	consensus: Option<GzipWriter>,
	positions: Option<GzipWriter>
}

pub fn main() {
	let args = parse_args(USAGE);
	let bam_path = args.get_path("<bam_file>");
	let genome_path = args.get_path("<genome.fa>");
	let sites_path = args.get_path("<sites.tsv>");
	let out_dir = args.get_path("<out_dir>");

	let settings = Settings {
		min_depths: parse_min_depths(args.get_str("--min-depth")).unwrap_or_else(|| error!(
			"--min-depth must be a comma-separated list of non-negative integers.")),
		uid_depth_only: args.get_bool("--uid-depth-only"),
		single_site: args.get_bool("--single-site")
	};
	let min_mapq: u8 = parse_option(&args, "--min-mapq", "an integer between 0 - 255");
	let umi_len: usize = parse_option(&args, "--umi-len", "a positive integer");
	let inline_window: usize = parse_option(&args, "--inline-window", "a positive integer");
	let sampling = SamplingSettings::from_args(&args);

	// Fail early on missing inputs, before any work is done.
	if !Path::new(&bam_path).is_file() { error!("Cannot open BAM file '{}'.", bam_path); }
	if !settings.uid_depth_only && !Path::new(&genome_path).is_file() {
		error!("Cannot open reference genome '{}'.", genome_path);
	}
	if !Path::new(&out_dir).is_dir() { error!("Output directory '{}' does not exist.", out_dir); }
	let sites_dir = Path::new(&sites_path).parent().filter(|p| !p.as_os_str().is_empty());
	if sites_dir.map_or(false, |dir| !dir.is_dir()) {
		error!("Directory for site list '{}' does not exist.", sites_path);
	}

	let mut extractor = BarcodeExtractor::new(args.get_str("--umi-tag"), umi_len)
		.unwrap_or_else(|e| error!("{}", e));
	if !args.get_str("--inline-pattern").is_empty() {
		extractor = extractor.with_inline_pattern(args.get_str("--inline-pattern"), inline_window)
			.unwrap_or_else(|e| error!("{}", e));
	}

	let mask = if args.get_str("--mask").is_empty() { BarcodeMask::default() }
		else { BarcodeMask::load(&args.get_path("--mask")) };
	let targets = if args.get_str("--targets").is_empty() { AmpliconTable::default() }
		else { AmpliconTable::load(&args.get_path("--targets")) };
	if mask.len() > 0 { info!("Loaded {} invalid barcode combinations.", mask.len()); }

	let sample = match args.get_str("--sample") {
		"" | "BAM file name" => Path::new(&bam_path).file_stem()
			.map(|s| s.to_string_lossy().into_owned()).unwrap_or_else(|| "sample".into()),
		name => name.to_string()
	};

	let sites = load_or_select_sites(&bam_path, &sites_path, &sampling)
		.unwrap_or_else(|e| error!("{}", e));
	if sites.is_empty() { error!("No sites found in {}.", sites_path); }

	let voters: Vec<ConsensusVoter> = settings.min_depths.iter()
		.map(|&d| ConsensusVoter::new(d)).collect();
	let genome = if settings.uid_depth_only { None } else { Some(genome_path.as_str()) };
	let mut source = BamAlignmentSource::open(&bam_path, genome, min_mapq)
		.unwrap_or_else(|e| error!("{}", e));

	let out_path = |suffix: &str| format!("{}/{}.{}", out_dir, sample, suffix);
	let mut out = Outputs {
		uid_depth: Vec::new(),
		consensus: if settings.uid_depth_only { None }
			else { Some(GzipWriter::new(&out_path("consensus.tsv.gz"))) },
		positions: if settings.uid_depth_only { None }
			else { Some(GzipWriter::new(&out_path("positions.tsv.gz"))) }
	};
	if let Some(positions) = &mut out.positions { write_position_header(positions); }

	info!("Processing {} sites with minimum family sizes {}...", sites.len(),
		voters.iter().map(|v| v.min_depth()).join(","));
	let mut total = Stats::default();
	for (site, _) in &sites {
		let alias = targets.alias(site);
		let result = process_site(&mut source, site, alias, &extractor, &mask, &voters, &settings)
			.unwrap_or_else(|e| error!("Failed to process site {}: {}", site, e));
		info!("{}: {} reads, {} families, {} with consensus, reporting threshold {}.",
			site, result.stats.reads, result.stats.families,
			result.stats.consensus_families, result.threshold);
		total += result.stats;
		write_site(&mut out, site, alias, result);

		if settings.single_site {
			info!("Stopping after the first site (--single-site).");
			break;
		}
	}

	write_uid_depths(&out_path("uid_depth.tsv.gz"), &mut out.uid_depth);
	if let Some(consensus) = out.consensus { consensus.finish(); }
	if let Some(positions) = out.positions { positions.finish(); }

	print_stats(&total);
}

fn write_site(out: &mut Outputs, site: &Site, alias: Option<&str>, result: SiteResult) {
	let site_id = site.to_string();
	for (umi, n) in result.uid_depths {
		out.uid_depth.push((site_id.clone(), umi, n));
	}

	for collapsed in &result.collapsed {
		if let Some(consensus) = &mut out.consensus {
			for line in &collapsed.consensus {
				write!(consensus, "{}\t{}\t{}\t{}\t{}\n", site_id, collapsed.min_depth,
					line.umi, line.family_size, line.consensus).unwrap_or_else(
					|_| error!("Failed to write consensus output."));
			}
		}

		if let Some(positions) = &mut out.positions {
			for row in &collapsed.positions {
				write_position_row(positions, site, alias.unwrap_or("."),
					collapsed.min_depth, row);
			}
		}
		debug!("Wrote {} positions for {} with minimum family size {}.",
			collapsed.positions.len(), site, collapsed.min_depth);
	}
}

fn write_position_header(out: &mut GzipWriter) {
	let symbols: Vec<char> = Symbol::ALL.iter().map(|s| s.to_char()).collect();
	let mut header = String::from("CHROM\tAMPLICON\tPOS\tREF");
	for s in &symbols { header += &format!("\t{}", s); }
	header += "\tRAWDP\tFAM";
	for s in &symbols { header += &format!("\tCONS_{}", s); }
	header += "\tCONSDP\tMIN_FAM\tMEAN_FAM";
	write!(out, "{}\n", header).unwrap_or_else(
		|_| error!("Failed to write position output."));
}

fn write_position_row(out: &mut GzipWriter, site: &Site, alias: &str, min_depth: u32,
	row: &PositionRow) {
	let mut line = format!("{}\t{}\t{}\t{}", site.chrom, alias, row.pos, row.reference.to_char());
	for &s in Symbol::ALL.iter() { line += &format!("\t{}", row.raw.get(s)); }
	line += &format!("\t{}\t{}", row.raw.total(), min_depth);
	for &s in Symbol::ALL.iter() { line += &format!("\t{}", row.consensus.get(s)); }
	line += &format!("\t{}\t{}\t{:.2}", row.consensus.total(),
		row.families.min(), row.families.mean());
	write!(out, "{}\n", line).unwrap_or_else(
		|_| error!("Failed to write position output."));
}

// Sorted by descending read count over the whole run. The sort is stable,
// so equal counts stay in site order.
fn write_uid_depths(path: &str, depths: &mut Vec<(String, Umi, u32)>) {
	depths.sort_by(|a, b| b.2.cmp(&a.2));
	let mut out = GzipWriter::new(path);
	for (site_id, umi, n) in depths.iter() {
		write!(out, "{}\t{}\t{}\n", site_id, umi, n).unwrap_or_else(
			|_| error!("Failed to write UMI depth output."));
	}
	out.finish();
}

fn print_stats(stats: &Stats) {
	let pct = |n: usize| n as f64 / stats.reads.max(1) as f64 * 100.0;
	eprintln!("\nReads starting at selected sites: {}", stats.reads);
	eprintln!("- No UMI found: {} ({:.1}%)", stats.no_barcode, pct(stats.no_barcode));
	eprintln!("- Masked UMI: {} ({:.1}%)", stats.masked, pct(stats.masked));
	eprintln!("- CIGAR does not fit read or reference: {} ({:.1}%)",
		stats.alignment_errors, pct(stats.alignment_errors));
	eprintln!("- Inconsistent alignment: {} ({:.1}%)", stats.transducer_errors,
		pct(stats.transducer_errors));
	eprintln!("UMI families: {}", stats.families);
	eprintln!("Families with consensus: {}", stats.consensus_families);
	eprintln!();
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::alignment::PaddingError;
	use crate::basecall::PaddedAlignment;
	use crate::errors::Result;

	struct MemorySource(Vec<(String, &'static str, &'static str, &'static str)>);

	impl AlignmentSource for MemorySource {
		fn fetch_site(&mut self, site: &Site) -> Result<Vec<AlignmentRecord>> {
			Ok(self.0.iter().map(|(name, r, m, q)| AlignmentRecord {
				start: site.start,
				name: name.clone(),
				sequence: q.replace('-', "").into_bytes(),
				padded: Ok(PaddedAlignment {
					reference: r.as_bytes().to_vec(),
					matches: m.as_bytes().to_vec(),
					query: q.as_bytes().to_vec()
				})
			}).collect())
		}
	}

	fn settings(uid_depth_only: bool) -> Settings {
		Settings { min_depths: vec![3], uid_depth_only, single_site: false }
	}

	fn voters(min_depths: &[u32]) -> Vec<ConsensusVoter> {
		min_depths.iter().map(|&d| ConsensusVoter::new(d)).collect()
	}

	fn reads() -> MemorySource {
		let mut reads = Vec::new();
		for k in 0..5 {
			reads.push((format!("a{} UMI:AAAAAAAAAA", k), "ACGT", "||||", "ACGT"));
		}
		reads.push(("t0 UMI:TTTTTTTTTT".to_string(), "ACGT", "||| ", "ACGA"));
		reads.push(("t1 UMI:TTTTTTTTTT".to_string(), "ACGT", "||||", "ACGT"));
		reads.push(("x0 UMI:CCC".to_string(), "ACGT", "||||", "ACGT"));
		reads.push(("b0 UMI:GGGGGGGGGG".to_string(), "AC-T", "|| |", "AC-T"));
		MemorySource(reads)
	}

	#[test]
	fn end_to_end_site() {
		let site = Site::new("chr1", 1000);
		let extractor = BarcodeExtractor::new("UMI:", 10).unwrap();
		let result = process_site(&mut reads(), &site, None, &extractor,
			&BarcodeMask::default(), &voters(&[3]), &settings(false)).unwrap();

		assert_eq!(result.stats.reads, 9);
		assert_eq!(result.stats.no_barcode, 1);
		assert_eq!(result.stats.transducer_errors, 1);
		assert_eq!(result.stats.families, 2);
		assert_eq!(result.stats.consensus_families, 1);

		let collapsed = &result.collapsed[0];
		assert_eq!(collapsed.min_depth, 3);
		assert_eq!(collapsed.consensus.len(), 1);
		assert_eq!(collapsed.consensus[0].umi.as_str(), "AAAAAAAAAA");
		assert_eq!(collapsed.consensus[0].family_size, 5);
		assert_eq!(collapsed.consensus[0].consensus, "ACGT");

		let last = &collapsed.positions[3];
		assert_eq!(last.pos, 1004);
		assert_eq!(last.raw.get(Symbol::T), 6);
		assert_eq!(last.raw.get(Symbol::A), 1);
		assert_eq!(last.consensus.get(Symbol::T), 5);
		assert_eq!(last.consensus.total(), 5);
		assert_eq!(last.families.min(), 5);

		assert_eq!(result.uid_depths[0], ("AAAAAAAAAA".into(), 5));
		assert_eq!(result.uid_depths.len(), 3);
	}

	#[test]
	fn one_table_per_min_depth() {
		let site = Site::new("chr1", 1000);
		let extractor = BarcodeExtractor::new("UMI:", 10).unwrap();
		let result = process_site(&mut reads(), &site, None, &extractor,
			&BarcodeMask::default(), &voters(&[0, 2, 6]), &settings(false)).unwrap();

		let min_depths: Vec<u32> = result.collapsed.iter().map(|c| c.min_depth).collect();
		assert_eq!(min_depths, vec![0, 2, 6]);

		// Uncollapsed: consensus depths are the raw depths.
		let uncollapsed = &result.collapsed[0];
		assert!(uncollapsed.consensus.is_empty());
		assert_eq!(uncollapsed.positions[3].consensus, uncollapsed.positions[3].raw);
		assert_eq!(uncollapsed.positions[3].families.mean(), 1.0);

		let pairs = &result.collapsed[1];
		assert_eq!(pairs.consensus.len(), 2);
		assert_eq!(pairs.positions[3].consensus.total(), 7);
		assert_eq!(pairs.positions[3].families.min(), 2);
		assert_eq!(pairs.positions[3].families.mean(), 3.5);

		let none = &result.collapsed[2];
		assert!(none.consensus.is_empty());
		assert_eq!(none.positions[3].consensus.total(), 0);
		assert_eq!(none.positions.len(), 4);

		assert_eq!(result.stats.consensus_families, 2);
	}

	#[test]
	fn unpadded_reads_are_counted_and_skipped() {
		let site = Site::new("chr1", 1000);
		let extractor = BarcodeExtractor::new("UMI:", 10).unwrap();
		let read = AlignmentRecord {
			start: 1000,
			name: "p0 UMI:AAAAAAAAAA".into(),
			sequence: b"ACGT".to_vec(),
			padded: Err(PaddingError::Overrun)
		};

		let mut ctx = SiteContext::new(&site, None);
		ctx.add_read(&read, &extractor, &BarcodeMask::default(), &settings(false));
		let result = ctx.finish(&voters(&[1]));
		assert_eq!(result.stats.alignment_errors, 1);
		assert_eq!(result.stats.transducer_errors, 0);
		assert_eq!(result.stats.families, 0);
		assert_eq!(result.uid_depths.len(), 1);

		let mut total = Stats::default();
		total += result.stats;
		total += result.stats;
		assert_eq!(total.alignment_errors, 2);
	}

	#[test]
	fn min_depth_lists() {
		assert_eq!(parse_min_depths("3"), Some(vec![3]));
		assert_eq!(parse_min_depths("10, 0,3,3"), Some(vec![0, 3, 10]));
		assert_eq!(parse_min_depths(""), None);
		assert_eq!(parse_min_depths("3,x"), None);
		assert_eq!(parse_min_depths("-1"), None);
	}

	#[test]
	fn masked_barcodes_only_count_in_uid_depth_mode() {
		let site = Site::new("chr1", 1000);
		let extractor = BarcodeExtractor::new("UMI:", 10).unwrap();
		let mask = BarcodeMask::from_lines(vec!["KRAS\tAAAAAAAAAA\tINVALID"].into_iter());

		let full = process_site(&mut reads(), &site, Some("KRAS"), &extractor, &mask,
			&voters(&[3]), &settings(false)).unwrap();
		assert_eq!(full.stats.masked, 5);
		assert!(full.collapsed[0].consensus.is_empty());
		assert!(full.uid_depths.iter().all(|(umi, _)| umi.as_str() != "AAAAAAAAAA"));

		let uid_only = process_site(&mut reads(), &site, Some("KRAS"), &extractor, &mask,
			&voters(&[3]), &settings(true)).unwrap();
		assert_eq!(uid_only.stats.masked, 0);
		assert_eq!(uid_only.uid_depths[0], ("AAAAAAAAAA".into(), 5));
		assert!(uid_only.collapsed[0].consensus.is_empty());
		assert!(uid_only.collapsed[0].positions.is_empty());
	}
}
