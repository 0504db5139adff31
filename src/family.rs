//! Grouping of per-read base calls into UMI families.

use std::collections::HashMap;
use itertools::Itertools;

use crate::barcode::Umi;
use crate::basecall::Call;
use crate::position::PositionTable;

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Family {
	pub count: u32,
	pub members: Vec<Vec<Call>>   // One base call string per read
}

// Families and tallies for a single site. Everything here is dropped once
// the site has been written out.
#[derive(Debug, Default)]
pub struct FamilyAggregator {
	families: HashMap<Umi, Family>,
	uid_depth: HashMap<Umi, u32>,
	raw: PositionTable
}

impl FamilyAggregator {
	/// Counts a read towards its barcode without storing any base calls.
	pub fn count_uid(&mut self, umi: &Umi) {
		*self.uid_depth.entry(umi.clone()).or_insert(0) += 1;
	}

	pub fn add(&mut self, umi: Umi, calls: Vec<Call>) {
		self.raw.add_raw(&calls);
		let family = self.families.entry(umi).or_default();
		family.count += 1;
		family.members.push(calls);
	}

	pub fn len(&self) -> usize { self.families.len() }

	pub fn is_empty(&self) -> bool { self.families.is_empty() }

	pub fn family(&self, umi: &str) -> Option<&Family> {
		self.families.get(umi)
	}

	pub fn raw_positions(&self) -> &PositionTable { &self.raw }

	// Sorted by barcode so that output order does not depend on hashing.
	pub fn sorted_families(&self) -> Vec<(&Umi, &Family)> {
		self.families.iter().sorted_by(|a, b| a.0.cmp(b.0)).collect()
	}

	/// Reads per barcode, most abundant first.
	pub fn uid_depths(&self) -> Vec<(&Umi, u32)> {
		self.uid_depth.iter().map(|(umi, &n)| (umi, n))
			.sorted_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.cmp(b.0)))
			.collect()
	}
}
