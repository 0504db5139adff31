
use docopt::{Docopt, ArgvMap};
use std::fmt::Arguments;
use std::io::{stdin, BufRead, BufReader, BufWriter, Write};
use std::fs::File;
use std::path::Path;
use flate2::Compression;
use flate2::read::MultiGzDecoder;
use flate2::write::GzEncoder;

macro_rules! error {
	($($arg:tt)+) => ({
		use std::process::exit;
		eprint!("ERROR: "); eprintln!($($arg)+); exit(-1);
	})
}

pub fn parse_args(usage: &str) -> ArgvMap {
	Docopt::new(usage).and_then(|d| d.parse()).unwrap_or_else(|_| {
		error!("Invalid arguments.\n{}", usage);
	})
}

pub fn init_logging() {
	let env = env_logger::Env::default().default_filter_or("info");
	let _ = env_logger::Builder::from_env(env)
		.target(env_logger::Target::Stderr)
		.format(|buf, record| writeln!(buf, "{}: {}", record.level(), record.args()))
		.try_init();
}

pub trait PathArgs {
	fn get_path(&self, arg: &str) -> String;
}

impl PathArgs for ArgvMap {
	fn get_path(&self, arg: &str) -> String {
		let path = self.get_str(arg);
		if path.starts_with('~') {
			if let Some(home) = std::env::var_os("HOME") {
				return format!("{}{}", Path::new(&home).display(), &path[1..]);
			}
		}
		path.into()
	}
}

// Parses a numeric option, exiting with a readable message if the value
// is not valid for the target type.
pub fn parse_option<T: std::str::FromStr>(args: &ArgvMap, arg: &str, what: &str) -> T {
	args.get_str(arg).parse().unwrap_or_else(
		|_| error!("{} must be {}.", arg, what))
}

pub struct GzipWriter {
	path: String,
	gzip: GzEncoder<BufWriter<File>>
}

impl GzipWriter {
	pub fn new(path: &str) -> GzipWriter {
		let file = File::create(path).unwrap_or_else(
			|_| error!("Cannot open file {} for writing.", path));
		GzipWriter {
			path: path.into(),
			gzip: GzEncoder::new(BufWriter::new(file), Compression::default())
		}
	}

	pub fn write_fmt(&mut self, fmt: Arguments) -> std::io::Result<()> {
		self.gzip.write_fmt(fmt)
	}

	// Writes the gzip trailer. Dropping the writer also does this, but
	// silently ignores any I/O error.
	pub fn finish(self) {
		let path = self.path;
		self.gzip.finish().and_then(|mut out| out.flush()).unwrap_or_else(
			|_| error!("Failed to finish writing {}.", path));
	}
}

pub struct FileReader {
	path: String,
	bufread: Box<dyn BufRead>
}

impl FileReader {
	pub fn new(path: &str) -> FileReader {
		let bufread: Box<dyn BufRead> = if path == "-" {
			Box::new(BufReader::new(stdin()))
		} else {
			let file = File::open(path).unwrap_or_else(
				|_| error!("Cannot open file {} for reading.", path));
			if path.ends_with(".gz") {
				Box::new(BufReader::new(MultiGzDecoder::new(file)))
			} else {
				Box::new(BufReader::new(file))
			}
		};
		FileReader { path: path.into(), bufread }
	}

	pub fn read_line(&mut self, line: &mut String) -> bool {
		line.clear();
		match self.bufread.read_line(line) {
			Ok(len) => len > 0,
			_ => { error!("I/O error while reading from file {}.", self.path); }
		}
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn gzip_output_reads_back_line_by_line() {
		let dir = tempfile::tempdir().unwrap();
		let path = dir.path().join("lines.tsv.gz");
		let path = path.to_str().unwrap();

		let mut out = GzipWriter::new(path);
		write!(out, "chr1:1000\t12\n").unwrap();
		write!(out, "chr2:55\t3\n").unwrap();
		out.finish();

		let mut reader = FileReader::new(path);
		let mut line = String::new();
		assert!(reader.read_line(&mut line));
		assert_eq!(line, "chr1:1000\t12\n");
		assert!(reader.read_line(&mut line));
		assert_eq!(line, "chr2:55\t3\n");
		assert!(reader.read_line(&mut line) == false);
	}
}
