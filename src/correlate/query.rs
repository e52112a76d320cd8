//! Occupancy query strings.
//!
//! Grammar (whitespace around terms is ignored):
//!
//! ```text
//! query   := term ("," term)*
//! term    := pattern | "[" pattern "]" | "{" ("[" pattern "]")+ "}"
//! pattern := ("0" | "1" | "x")*
//! ```
//!
//! Term `i` constrains image `i`; character `r` of a pattern constrains ROI
//! `r` of a group. A `{...}` term lists alternatives for one image and the
//! query expands to the cartesian product of all alternatives.
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum QueryError {
    #[error("invalid character {ch:?} in term {term:?}; expected 0, 1 or x")]
    InvalidCharacter { term: String, ch: char },
    #[error("malformed term {0:?}")]
    Malformed(String),
    #[error("query constrains image {image} but only {images} are available")]
    ImageOutOfRange { image: usize, images: usize },
    #[error("query constrains ROI {roi} of image {image} but only {rois} exist")]
    RoiOutOfRange { image: usize, roi: usize, rois: usize },
    #[error("unknown ROI group {group}; {groups} available")]
    GroupOutOfRange { group: usize, groups: usize },
    #[error("got {found} selections for {expected} ROI groups")]
    SelectionMismatch { expected: usize, found: usize },
}

/// Constraint on one ROI in one image.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Requirement {
    Occupied,
    Empty,
    Any,
}

impl Requirement {
    fn from_char(ch: char) -> Option<Self> {
        match ch {
            '1' => Some(Requirement::Occupied),
            '0' => Some(Requirement::Empty),
            'x' | 'X' => Some(Requirement::Any),
            _ => None,
        }
    }

    fn as_char(self) -> char {
        match self {
            Requirement::Occupied => '1',
            Requirement::Empty => '0',
            Requirement::Any => 'x',
        }
    }

    /// Whether an occupancy label satisfies this requirement.
    pub fn accepts(self, occupied: bool) -> bool {
        match self {
            Requirement::Occupied => occupied,
            Requirement::Empty => !occupied,
            Requirement::Any => true,
        }
    }
}

/// Per-ROI requirements of one image.
pub type ImagePattern = Vec<Requirement>;

/// A parsed query: for every image, one or more alternative patterns.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct OccupancyQuery {
    images: Vec<Vec<ImagePattern>>,
}

impl OccupancyQuery {
    /// A query that accepts every shot.
    pub fn unconstrained() -> Self {
        Self::default()
    }

    pub fn parse(text: &str) -> Result<Self, QueryError> {
        let text = text.trim();
        if text.is_empty() {
            return Ok(Self::default());
        }
        let images = text
            .split(',')
            .map(|term| parse_term(term.trim()))
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Self { images })
    }

    pub fn image_count(&self) -> usize {
        self.images.len()
    }

    /// True when no character constrains anything.
    pub fn is_unconstrained(&self) -> bool {
        self.images
            .iter()
            .flatten()
            .flatten()
            .all(|r| *r == Requirement::Any)
    }

    /// Every combination of per-image alternatives; each is one pattern per
    /// image.
    pub fn permutations(&self) -> Vec<Vec<ImagePattern>> {
        let mut out: Vec<Vec<ImagePattern>> = vec![Vec::new()];
        for alternatives in &self.images {
            out = out
                .iter()
                .flat_map(|prefix| {
                    alternatives.iter().map(move |alt| {
                        let mut next = prefix.clone();
                        next.push(alt.clone());
                        next
                    })
                })
                .collect();
        }
        out
    }

    /// Reject constraints on images or ROIs that do not exist. Trailing `x`
    /// characters beyond the available ROIs are allowed.
    pub fn validate(&self, images: usize, rois: usize) -> Result<(), QueryError> {
        for (image, alternatives) in self.images.iter().enumerate() {
            for pattern in alternatives {
                for (roi, req) in pattern.iter().enumerate() {
                    if *req == Requirement::Any {
                        continue;
                    }
                    if image >= images {
                        return Err(QueryError::ImageOutOfRange { image, images });
                    }
                    if roi >= rois {
                        return Err(QueryError::RoiOutOfRange { image, roi, rois });
                    }
                }
            }
        }
        Ok(())
    }
}

fn parse_pattern(term: &str, body: &str) -> Result<ImagePattern, QueryError> {
    body.chars()
        .map(|ch| {
            Requirement::from_char(ch).ok_or_else(|| QueryError::InvalidCharacter {
                term: term.to_string(),
                ch,
            })
        })
        .collect()
}

fn parse_term(term: &str) -> Result<Vec<ImagePattern>, QueryError> {
    let malformed = || QueryError::Malformed(term.to_string());
    if let Some(inner) = term.strip_prefix('{') {
        let inner = inner.strip_suffix('}').ok_or_else(malformed)?;
        let inner = inner
            .strip_prefix('[')
            .and_then(|s| s.strip_suffix(']'))
            .ok_or_else(malformed)?;
        return inner.split("][").map(|alt| parse_pattern(term, alt)).collect();
    }
    let body = match term.strip_prefix('[') {
        Some(rest) => rest.strip_suffix(']').ok_or_else(malformed)?,
        None => term,
    };
    Ok(vec![parse_pattern(term, body)?])
}

impl FromStr for OccupancyQuery {
    type Err = QueryError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl fmt::Display for OccupancyQuery {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let pattern = |p: &ImagePattern| p.iter().map(|r| r.as_char()).collect::<String>();
        let terms: Vec<String> = self
            .images
            .iter()
            .map(|alts| match alts.as_slice() {
                [single] => format!("[{}]", pattern(single)),
                _ => {
                    let inner: String = alts.iter().map(|a| format!("[{}]", pattern(a))).collect();
                    format!("{{{inner}}}")
                }
            })
            .collect();
        write!(f, "{}", terms.join(","))
    }
}
