//! Conversion of padded alignments into per-offset base calls.
//!
//! A base call string is indexed by the offset from the read's aligned start.
//! Reference-matching bases are stored as `Ref`, bases that disagree with the
//! reference as `Mismatch` (rendered in lowercase), deleted reference bases
//! as `Deletion` and insertions as an `Insertion` marker on the reference
//! base that precedes the inserted sequence.

use std::fmt;
use thiserror::Error;

pub const GAP: u8 = b'-';
pub const MATCH: u8 = b'|';

#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Base { A, C, G, T, N }

impl Base {
	// Anything outside ACGT (including IUPAC ambiguity codes) is an N.
	pub fn from_u8(b: u8) -> Base {
		match b.to_ascii_uppercase() {
			b'A' => Base::A, b'C' => Base::C, b'G' => Base::G, b'T' => Base::T,
			_ => Base::N
		}
	}

	pub fn to_u8(self) -> u8 {
		match self {
			Base::A => b'A', Base::C => b'C', Base::G => b'G', Base::T => b'T',
			Base::N => b'N'
		}
	}

	fn symbol(self) -> Symbol {
		match self {
			Base::A => Symbol::A, Base::C => Symbol::C, Base::G => Symbol::G,
			Base::T => Symbol::T, Base::N => Symbol::N
		}
	}
}

// The derived ordering is the tie-break order used by the consensus vote:
// reference calls first, then mismatches, deletions and insertions.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Call {
	Ref(Base),
	Mismatch(Base),
	Deletion,
	Insertion
}

impl Call {
	pub fn is_reference(self) -> bool {
		match self { Call::Ref(_) => true, _ => false }
	}

	/// Case-folded symbol used in the per-position depth tables.
	pub fn symbol(self) -> Symbol {
		match self {
			Call::Ref(b) | Call::Mismatch(b) => b.symbol(),
			Call::Deletion => Symbol::D,
			Call::Insertion => Symbol::I
		}
	}

	pub fn to_char(self) -> char {
		match self {
			Call::Ref(b) => b.to_u8() as char,
			Call::Mismatch(b) => b.to_u8().to_ascii_lowercase() as char,
			Call::Deletion => '-',
			Call::Insertion => '+'
		}
	}

	pub fn from_char(c: char) -> Option<Call> {
		match c {
			'-' => Some(Call::Deletion),
			'+' => Some(Call::Insertion),
			'A' | 'C' | 'G' | 'T' | 'N' => Some(Call::Ref(Base::from_u8(c as u8))),
			'a' | 'c' | 'g' | 't' | 'n' => Some(Call::Mismatch(Base::from_u8(c as u8))),
			_ => None
		}
	}
}

/// Renders a base call string, e.g. `ACg-T+`.
pub struct CallString<'a>(pub &'a [Call]);

impl<'a> fmt::Display for CallString<'a> {
	fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
		for call in self.0 {
			write!(f, "{}", call.to_char())?;
		}
		Ok(())
	}
}

pub fn parse_calls(text: &str) -> Option<Vec<Call>> {
	text.chars().map(Call::from_char).collect()
}

// Closed symbol set of the depth tables, in output column order.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum Symbol { A, C, G, T, D, I, N }

impl Symbol {
	pub const ALL: [Symbol; 7] = [Symbol::A, Symbol::C, Symbol::G, Symbol::T,
		Symbol::D, Symbol::I, Symbol::N];

	pub fn index(self) -> usize { self as usize }

	pub fn to_char(self) -> char {
		match self {
			Symbol::A => 'A', Symbol::C => 'C', Symbol::G => 'G', Symbol::T => 'T',
			Symbol::D => 'D', Symbol::I => 'I', Symbol::N => 'N'
		}
	}
}

/// Reference row, match-indicator row and query row of one alignment,
/// aligned column for column with `-` marking gaps.
#[derive(Clone, Debug, PartialEq, Eq, Default)]
pub struct PaddedAlignment {
	pub reference: Vec<u8>,
	pub matches: Vec<u8>,
	pub query: Vec<u8>
}

#[derive(Error, Debug, PartialEq, Eq)]
pub enum TransducerError {
	#[error("padded rows differ in length (reference {reference}, match {matches}, query {query})")]
	RowLengths { reference: usize, matches: usize, query: usize },

	#[error("reference row contains no aligned bases")]
	Empty,

	#[error("gap in both reference and query at column {0}")]
	DoubleGap(usize),

	#[error("match row marks column {0} as identical but the bases differ")]
	MatchConflict(usize),

	#[error("insertion at column {0} precedes the first reference base")]
	LeadingInsertion(usize)
}

pub fn transduce(padded: &PaddedAlignment) -> Result<Vec<Call>, TransducerError> {
	let (reference, matches, query) =
		(&padded.reference, &padded.matches, &padded.query);
	if reference.len() != matches.len() || reference.len() != query.len() {
		return Err(TransducerError::RowLengths {
			reference: reference.len(), matches: matches.len(), query: query.len()
		});
	}

	// Leading and trailing reference gaps are adapter overhang
	// (soft-clipped bases), not insertions.
	let first = reference.iter().position(|&b| b != GAP)
		.ok_or(TransducerError::Empty)?;
	let last = reference.iter().rposition(|&b| b != GAP)
		.ok_or(TransducerError::Empty)?;

	let mut calls: Vec<Call> = Vec::with_capacity(last - first + 1);
	let mut in_insertion = false;

	for col in first..=last {
		let (r, m, q) = (reference[col], matches[col], query[col]);
		if r == GAP && q == GAP {
			return Err(TransducerError::DoubleGap(col));
		} else if r == GAP {
			if in_insertion { continue; }
			// Marks the last reference base before the inserted sequence.
			let prev = calls.last_mut().ok_or(TransducerError::LeadingInsertion(col))?;
			*prev = Call::Insertion;
			in_insertion = true;
		} else if q == GAP {
			calls.push(Call::Deletion);
			in_insertion = false;
		} else if r.eq_ignore_ascii_case(&q) {
			calls.push(Call::Ref(Base::from_u8(q)));
			in_insertion = false;
		} else {
			if m == MATCH { return Err(TransducerError::MatchConflict(col)); }
			calls.push(Call::Mismatch(Base::from_u8(q)));
			in_insertion = false;
		}
	}

	Ok(calls)
}
