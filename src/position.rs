//! Per-position raw and consensus depth tables for one site.

use crate::basecall::{Call, Symbol};
use crate::consensus::ConsensusVoter;
use crate::family::FamilyAggregator;
use crate::site::Site;

// Positions with less than this fraction of the site's peak raw depth
// are not reported.
const REPORTING_FRACTION_DIVISOR: u32 = 10;

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct Depths([u32; 7]);

impl Depths {
	pub fn get(&self, symbol: Symbol) -> u32 { self.0[symbol.index()] }

	pub fn add(&mut self, symbol: Symbol, n: u32) { self.0[symbol.index()] += n; }

	pub fn total(&self) -> u32 { self.0.iter().sum() }

	// Ties resolve to the earliest symbol in A,C,G,T,D,I,N order.
	pub fn most_common(&self) -> Symbol {
		let mut best = Symbol::A;
		for &symbol in Symbol::ALL.iter() {
			if self.get(symbol) > self.get(best) { best = symbol; }
		}
		best
	}
}

/// Sizes of the families whose consensus has a call at one offset.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct FamilySizes {
	min: u32,
	sum: u64,
	n: u32
}

impl FamilySizes {
	pub fn add(&mut self, size: u32, families: u32) {
		if families == 0 { return; }
		if self.n == 0 || size < self.min { self.min = size; }
		self.sum += size as u64 * families as u64;
		self.n += families;
	}

	pub fn min(&self) -> u32 { self.min }

	pub fn mean(&self) -> f64 {
		if self.n == 0 { 0.0 } else { self.sum as f64 / self.n as f64 }
	}
}

/// Depth tables keyed by offset from the site start.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct PositionTable {
	raw: Vec<Depths>,
	consensus: Vec<Depths>,
	family_sizes: Vec<FamilySizes>
}

fn tally(table: &mut Vec<Depths>, calls: &[Call], weight: u32) {
	if table.len() < calls.len() { table.resize(calls.len(), Depths::default()); }
	for (offset, call) in calls.iter().enumerate() {
		table[offset].add(call.symbol(), weight);
	}
}

impl PositionTable {
	pub fn add_raw(&mut self, calls: &[Call]) {
		tally(&mut self.raw, calls, 1);
	}

	pub fn add_consensus(&mut self, calls: &[Call], family_size: u32) {
		tally(&mut self.consensus, calls, family_size);
		if self.family_sizes.len() < calls.len() {
			self.family_sizes.resize(calls.len(), FamilySizes::default());
		}
		for sizes in &mut self.family_sizes[..calls.len()] { sizes.add(family_size, 1); }
	}

	// Every read is its own family of one: the consensus table is the raw one.
	pub fn add_uncollapsed(&mut self) {
		self.consensus = self.raw.clone();
		self.family_sizes = self.raw.iter().map(|depths| {
			let mut sizes = FamilySizes::default();
			sizes.add(1, depths.total());
			sizes
		}).collect();
	}

	pub fn raw(&self, offset: usize) -> Depths {
		self.raw.get(offset).cloned().unwrap_or_default()
	}

	pub fn consensus(&self, offset: usize) -> Depths {
		self.consensus.get(offset).cloned().unwrap_or_default()
	}

	pub fn family_sizes(&self, offset: usize) -> FamilySizes {
		self.family_sizes.get(offset).cloned().unwrap_or_default()
	}

	pub fn len(&self) -> usize { self.raw.len().max(self.consensus.len()) }

	pub fn max_raw_depth(&self) -> u32 {
		self.raw.iter().map(|d| d.total()).max().unwrap_or(0)
	}

	/// floor(10% of the highest raw depth at the site).
	pub fn reporting_threshold(&self) -> u32 {
		self.max_raw_depth() / REPORTING_FRACTION_DIVISOR
	}

	pub fn rows(&self, site: &Site) -> Vec<PositionRow> {
		let threshold = self.reporting_threshold();
		let mut rows = Vec::new();
		for offset in 0..self.len() {
			let raw = self.raw(offset);
			if raw.total() == 0 || raw.total() < threshold { continue; }
			rows.push(PositionRow {
				pos: site.start + offset as u64 + 1,
				reference: raw.most_common(),
				raw, consensus: self.consensus(offset),
				families: self.family_sizes(offset)
			});
		}
		rows
	}
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PositionRow {
	pub pos: u64,           // 1-based genomic position
	pub reference: Symbol,  // Most common raw symbol
	pub raw: Depths,
	pub consensus: Depths,
	pub families: FamilySizes
}

pub struct ConsensusCall<'a> {
	pub umi: &'a str,
	pub family_size: u32,
	pub calls: Vec<Call>
}

// Combines the raw tallies collected while families were built with the
// consensus of every family that reaches the minimum depth. The family set
// is only read, so aggregating twice gives identical tables. A minimum
// depth of zero gives the uncollapsed table and no consensus calls.
pub fn aggregate<'a>(families: &'a FamilyAggregator, voter: &ConsensusVoter)
	-> (PositionTable, Vec<ConsensusCall<'a>>) {

	let mut table = families.raw_positions().clone();
	if voter.is_uncollapsed() {
		table.add_uncollapsed();
		return (table, Vec::new());
	}
	let mut calls = Vec::new();
	for (umi, family) in families.sorted_families() {
		if let Some(consensus) = voter.call(family) {
			table.add_consensus(&consensus, family.count);
			calls.push(ConsensusCall {
				umi: umi.as_str(), family_size: family.count, calls: consensus
			});
		}
	}
	(table, calls)
}
