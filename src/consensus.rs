//! Majority-vote consensus of a UMI family.

use std::cmp::Reverse;

use crate::basecall::Call;
use crate::family::Family;

// At or below this depth, a non-reference call must be unanimous.
const UNANIMITY_MAX_DEPTH: u32 = 20;

// Above UNANIMITY_MAX_DEPTH, a non-reference call needs at least 9/10 of
// the reads at the offset.
const MIN_ALLELE_RATIO_NUM: u32 = 9;
const MIN_ALLELE_RATIO_DEN: u32 = 10;

pub struct ConsensusVoter {
	min_depth: u32
}

impl ConsensusVoter {
	pub fn new(min_depth: u32) -> ConsensusVoter {
		ConsensusVoter { min_depth }
	}

	pub fn min_depth(&self) -> u32 { self.min_depth }

	/// A minimum depth of zero means no collapsing into families.
	pub fn is_uncollapsed(&self) -> bool { self.min_depth == 0 }

	/// Consensus base call string of a family, or None if the family has
	/// fewer members than the minimum depth.
	pub fn call(&self, family: &Family) -> Option<Vec<Call>> {
		if family.count < self.min_depth || family.members.is_empty() { return None; }

		let longest = family.members.iter().map(|m| m.len()).max().unwrap_or(0);
		let mut consensus = Vec::with_capacity(longest);
		let mut counts: Vec<(Call, u32)> = Vec::new();
		for offset in 0..longest {
			counts.clear();
			for member in &family.members {
				let call = match member.get(offset) { Some(&c) => c, None => continue };
				match counts.iter_mut().find(|(c, _)| *c == call) {
					Some(entry) => entry.1 += 1,
					None => counts.push((call, 1))
				}
			}
			if let Some(call) = vote(&mut counts) { consensus.push(call); }
		}
		Some(consensus)
	}
}

// Picks the call at one offset from (call, count) tallies.
fn vote(counts: &mut [(Call, u32)]) -> Option<Call> {
	if counts.is_empty() { return None; }
	counts.sort_by_key(|&(call, n)| (Reverse(n), call));

	let (common, n_common) = counts[0];
	if common.is_reference() || counts.len() == 1 { return Some(common); }

	let depth: u32 = counts.iter().map(|&(_, n)| n).sum();
	let confident = if depth <= UNANIMITY_MAX_DEPTH {
		n_common == depth
	} else {
		n_common * MIN_ALLELE_RATIO_DEN >= depth * MIN_ALLELE_RATIO_NUM
	};
	Some(if confident { common } else { counts[1].0 })
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::basecall::{parse_calls, Base, CallString};

	fn family(members: &[&str]) -> Family {
		Family {
			count: members.len() as u32,
			members: members.iter().map(|m| parse_calls(m).unwrap()).collect()
		}
	}

	fn repeated(parts: &[(&str, usize)]) -> Family {
		let mut members = Vec::new();
		for &(s, n) in parts {
			for _ in 0..n { members.push(s); }
		}
		family(&members)
	}

	fn consensus(voter: &ConsensusVoter, f: &Family) -> Option<String> {
		voter.call(f).map(|c| CallString(&c).to_string())
	}

	#[test]
	fn below_min_depth_is_absent() {
		let voter = ConsensusVoter::new(3);
		assert_eq!(consensus(&voter, &family(&["ACGT", "ACGT"])), None);
		assert_eq!(consensus(&voter, &family(&["ACGT", "ACGT", "ACGT"])),
			Some("ACGT".into()));
	}

	#[test]
	fn reference_majority_wins() {
		let voter = ConsensusVoter::new(1);
		assert_eq!(consensus(&voter, &family(&["ACGT", "ACGT", "ACcT"])),
			Some("ACGT".into()));
	}

	#[test]
	fn low_depth_variant_needs_unanimity() {
		let voter = ConsensusVoter::new(1);
		// Two of three reads show a mismatch: not unanimous, fall back.
		assert_eq!(consensus(&voter, &family(&["ACcT", "ACcT", "ACGT"])),
			Some("ACGT".into()));
		assert_eq!(consensus(&voter, &family(&["ACcT", "ACcT", "ACcT"])),
			Some("ACcT".into()));
		assert_eq!(consensus(&voter, &repeated(&[("A-GT", 19), ("ACGT", 1)])),
			Some("ACGT".into()));
	}

	#[test]
	fn low_depth_fallback_may_be_non_reference() {
		// The runner-up is taken as is, even if it is itself a variant.
		let voter = ConsensusVoter::new(1);
		assert_eq!(consensus(&voter, &family(&["AC-T", "AC-T", "ACaT"])),
			Some("ACaT".into()));
	}

	#[test]
	fn high_depth_variant_needs_ratio() {
		let voter = ConsensusVoter::new(1);
		// 22/25 = 0.88 is below 0.90
		assert_eq!(consensus(&voter, &repeated(&[("ACcT", 22), ("ACGT", 3)])),
			Some("ACGT".into()));
		// 23/25 = 0.92
		assert_eq!(consensus(&voter, &repeated(&[("ACcT", 23), ("ACGT", 2)])),
			Some("ACcT".into()));
		// Exactly 0.90 passes
		assert_eq!(consensus(&voter, &repeated(&[("AC+T", 27), ("ACGT", 3)])),
			Some("AC+T".into()));
	}

	#[test]
	fn high_depth_reference_is_never_overridden() {
		let voter = ConsensusVoter::new(1);
		assert_eq!(consensus(&voter, &repeated(&[("ACGT", 20), ("ACcT", 5)])),
			Some("ACGT".into()));
	}

	#[test]
	fn ties_resolve_by_call_order() {
		let mut counts = vec![(Call::Mismatch(Base::C), 2), (Call::Ref(Base::G), 2)];
		assert_eq!(vote(&mut counts), Some(Call::Ref(Base::G)));

		// The mismatch ranks first, is not unanimous, and gives way.
		let voter = ConsensusVoter::new(1);
		assert_eq!(consensus(&voter, &family(&["ACgT", "AC-T"])), Some("AC-T".into()));
	}

	#[test]
	fn output_is_bounded_by_longest_member() {
		let voter = ConsensusVoter::new(1);
		let f = family(&["ACGTAC", "ACG", "ACGTA", "AC-TAC"]);
		let calls = voter.call(&f).unwrap();
		assert_eq!(calls.len(), 6);
		for (offset, call) in calls.iter().enumerate() {
			assert!(f.members.iter().any(|m| m.get(offset) == Some(call)));
		}
	}

	#[test]
	fn raising_min_depth_never_adds_consensus() {
		let families = vec![family(&["AC"; 2]), family(&["AC"; 5]), family(&["AC"; 3]),
			family(&["AC"; 8]), family(&["AC"; 1])];
		let mut previous = usize::MAX;
		for min_depth in 1..10 {
			let voter = ConsensusVoter::new(min_depth);
			let n = families.iter().filter(|f| voter.call(f).is_some()).count();
			assert!(n <= previous);
			previous = n;
		}
	}
}
