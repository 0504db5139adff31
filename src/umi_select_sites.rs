use crate::common::{parse_args, parse_option, PathArgs};
use crate::errors::Result;
use crate::site::{Site, select_top_sites, read_site_list, write_site_list};
use std::path::Path;
use std::collections::HashMap;
use log::info;
use rand::{Rng, SeedableRng};
use rand::rngs::StdRng;
use rust_htslib::bam::{self, Read};

const USAGE: &str = "
Usage:
  umi select sites [options] <bam_file> <sites.tsv>

Options:
  --top-sites=N        Number of sites to keep [default: 100]
  --sample-fraction=F  Fraction of alignments to sample [default: 0.1]
  --seed=N             Random seed for sampling [default: 1]
  --force              Resample even if the site list already exists

Samples a fraction of the alignments in the BAM file, counts how many
sampled reads start at each genomic position, and writes the most densely
covered positions into a tab-separated site list (chrom:start, read count),
sorted by descending read count. Start coordinates are 0-based.

If the site list already exists, it is reused as is.
";

pub struct SamplingSettings {
	pub top_sites: usize,
	pub fraction: f64,
	pub seed: u64
}

impl SamplingSettings {
	pub fn from_args(args: &docopt::ArgvMap) -> SamplingSettings {
		let settings = SamplingSettings {
			top_sites: parse_option(args, "--top-sites", "a positive integer"),
			fraction: parse_option(args, "--sample-fraction", "a number between 0 - 1"),
			seed: parse_option(args, "--seed", "a non-negative integer")
		};
		if settings.top_sites == 0 { error!("--top-sites must be a positive integer."); }
		if !(settings.fraction > 0.0 && settings.fraction <= 1.0) {
			error!("--sample-fraction must be a number between 0 - 1.");
		}
		settings
	}
}

pub fn main() {
	let args = parse_args(USAGE);
	let bam_path = args.get_path("<bam_file>");
	let sites_path = args.get_path("<sites.tsv>");
	let settings = SamplingSettings::from_args(&args);

	if !Path::new(&bam_path).is_file() {
		error!("Cannot open BAM file '{}'.", bam_path);
	}
	if args.get_bool("--force") && Path::new(&sites_path).exists() {
		std::fs::remove_file(&sites_path).unwrap_or_else(
			|_| error!("Cannot replace site list {}.", sites_path));
	}

	let sites = load_or_select_sites(&bam_path, &sites_path, &settings)
		.unwrap_or_else(|e| error!("{}", e));
	eprintln!("{} sites listed in {}.", sites.len(), sites_path);
}

// The site list is a durable cache: once written, later runs read it
// instead of sampling the BAM file again.
pub fn load_or_select_sites(bam_path: &str, sites_path: &str, settings: &SamplingSettings) -> Result<Vec<(Site, u64)>> {
	if Path::new(sites_path).exists() {
		info!("Reusing site list {}.", sites_path);
		return read_site_list(sites_path);
	}

	info!("Sampling {:.1}% of alignments in {} to find sites...",
		settings.fraction * 100.0, bam_path);
	let counts = sample_site_counts(bam_path, settings.fraction, settings.seed)?;
	let sites = select_top_sites(counts, settings.top_sites);
	write_site_list(sites_path, &sites)?;
	info!("Wrote {} sites into {}.", sites.len(), sites_path);
	Ok(sites)
}

pub fn sample_site_counts(bam_path: &str, fraction: f64, seed: u64) -> Result<HashMap<Site, u64>> {
	let mut bam = bam::Reader::from_path(bam_path)?;
	let chr_names: Vec<String> = bam.header().target_names().iter()
		.map(|x| String::from_utf8_lossy(x).into_owned()).collect();

	let mut rng = StdRng::seed_from_u64(seed);
	let mut counts: HashMap<(i32, i64), u64> = HashMap::new();
	let mut sampled: u64 = 0;
	for r in bam.records() {
		let read = r?;
		if read.is_secondary() || read.is_supplementary() { continue; }
		if rng.gen::<f64>() >= fraction { continue; }
		sampled += 1;

		// Unmapped reads sit at the "*" marker (tid -1) and are not sites.
		if read.tid() < 0 || read.is_unmapped() { continue; }
		*counts.entry((read.tid(), read.pos())).or_insert(0) += 1;
	}
	info!("Sampled {} alignments at {} distinct start positions.", sampled, counts.len());

	Ok(counts.into_iter()
		.map(|((tid, pos), n)| (Site::new(&chr_names[tid as usize], pos as u64), n))
		.collect())
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::alignment::write_test_bam;

	fn settings(top_sites: usize) -> SamplingSettings {
		SamplingSettings { top_sites, fraction: 1.0, seed: 1 }
	}

	#[test]
	fn existing_site_list_is_reused_without_sampling() {
		let dir = tempfile::tempdir().unwrap();
		let sites_path = dir.path().join("sites.tsv");
		let sites_path = sites_path.to_str().unwrap();
		let listed = vec![(Site::new("chr2", 500), 12), (Site::new("chr1", 7), 3)];
		write_site_list(sites_path, &listed).unwrap();

		// The BAM file does not exist, so any attempt to sample would fail.
		let missing_bam = dir.path().join("missing.bam");
		let sites = load_or_select_sites(missing_bam.to_str().unwrap(), sites_path,
			&settings(100)).unwrap();
		assert_eq!(sites, listed);
	}

	#[test]
	fn sampling_skips_unmapped_and_non_primary_reads() {
		let dir = tempfile::tempdir().unwrap();
		let (bam_path, _) = write_test_bam(dir.path());

		let counts = sample_site_counts(&bam_path, 1.0, 1).unwrap();
		assert_eq!(counts.len(), 2);
		assert_eq!(counts.get(&Site::new("chr1", 98)), Some(&1));
		assert_eq!(counts.get(&Site::new("chr1", 100)), Some(&4));
	}

	#[test]
	fn missing_site_list_is_selected_and_saved() {
		let dir = tempfile::tempdir().unwrap();
		let (bam_path, _) = write_test_bam(dir.path());
		let sites_path = dir.path().join("sites.tsv");
		let sites_path = sites_path.to_str().unwrap();

		let sites = load_or_select_sites(&bam_path, sites_path, &settings(1)).unwrap();
		assert_eq!(sites, vec![(Site::new("chr1", 100), 4)]);
		assert_eq!(read_site_list(sites_path).unwrap(), sites);
	}
}
