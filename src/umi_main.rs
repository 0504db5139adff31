
use std::env;

#[macro_use] mod common;
mod errors; mod basecall; mod barcode; mod family; mod consensus;
mod position; mod site; mod targets; mod alignment;
mod umi_select_sites; mod umi_consensus;

const USAGE: &str = "
Usage:
  umi select sites [options] <bam_file> <sites.tsv>
  umi consensus [options] <bam_file> <genome.fa> <sites.tsv> <out_dir>
";

fn main() {
	let args: Vec<String> = env::args().collect();
	common::init_logging();

	if args.len() >= 3 && args[1..3] == ["select", "sites"] {
		umi_select_sites::main();
	} else if args.len() >= 2 && args[1] == "consensus" {
		umi_consensus::main();
	} else {
		eprintln!("{}", USAGE);
	}
}
