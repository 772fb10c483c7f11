//! Routing rules at fracture intersections.
//!
//! A [`Junction`] lists up to four cells sharing the intersection edge at the
//! crossing point. A candidate with a negative score carries flow away from the
//! intersection. The rules are written as pure functions of a uniform draw `u`
//! so they can be checked against their analytic branch probabilities.

use rand::Rng;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MixingRule {
    #[default]
    CompleteMixing,
    StreamlineRouting,
}

impl std::fmt::Display for MixingRule {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            MixingRule::CompleteMixing => write!(f, "complete mixing"),
            MixingRule::StreamlineRouting => write!(f, "streamline routing"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Candidate {
    pub cell: usize,
    pub fracture: usize,
    /// Negative when the cell carries flow away from the intersection.
    pub score: f64,
    pub speed_sq: f64,
}

impl Candidate {
    pub fn is_outflow(&self) -> bool {
        self.score < 0.0
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Junction {
    pub candidates: Vec<Candidate>,
    /// Cell the particle arrived from.
    pub prev_cell: Option<usize>,
    /// Fracture the particle arrived on.
    pub prev_fracture: usize,
}

impl Junction {
    pub fn outflows(&self) -> Vec<Candidate> {
        self.candidates
            .iter()
            .filter(|c| c.is_outflow())
            .copied()
            .collect()
    }

    /// Fastest candidate other than the arrival cell, for junctions without outflow.
    pub fn fastest_escape(&self) -> Option<Candidate> {
        let mut best = None;
        let mut max = 0.0;
        for c in &self.candidates {
            if Some(c.cell) == self.prev_cell {
                continue;
            }
            if c.speed_sq > max {
                max = c.speed_sq;
                best = Some(*c);
            }
        }
        best
    }

    fn incoming_speed_sq(&self) -> f64 {
        self.candidates
            .iter()
            .find(|c| Some(c.cell) == self.prev_cell)
            .or_else(|| {
                self.candidates
                    .iter()
                    .filter(|c| c.fracture == self.prev_fracture && !c.is_outflow())
                    .last()
            })
            .map_or(0.0, |c| c.speed_sq)
    }
}

/// Pick the outgoing cell. A uniform number is drawn only when two or more
/// candidates carry outflow.
pub fn choose<R: Rng>(rule: MixingRule, junction: &Junction, rng: &mut R) -> Option<Candidate> {
    let u = if junction.outflows().len() >= 2 {
        rng.random::<f64>()
    } else {
        0.0
    };
    match rule {
        MixingRule::CompleteMixing => complete_mixing(junction, u),
        MixingRule::StreamlineRouting => streamline_routing(junction, u),
    }
}

/// Flux-proportional choice among the outflowing cells.
pub fn complete_mixing(junction: &Junction, u: f64) -> Option<Candidate> {
    let out = junction.outflows();
    match out.len() {
        0 => junction.fastest_escape(),
        1 => Some(out[0]),
        2 => {
            let (r0, r1) = (out[0].speed_sq.sqrt(), out[1].speed_sq.sqrt());
            let total = r0 + r1;
            if total > 0.0 && u <= r0 / total {
                Some(out[0])
            } else {
                Some(out[1])
            }
        }
        3 => Some(three_way(&out, u)),
        _ => Some(four_way(&out, u)),
    }
}

fn three_way(out: &[Candidate], u: f64) -> Candidate {
    let roots: Vec<f64> = out.iter().map(|c| c.speed_sq.sqrt()).collect();
    let total: f64 = roots.iter().sum();
    if total <= 0.0 {
        return out[1];
    }
    if u > (roots[0] + roots[1]) / total {
        out[2]
    } else if u <= roots[0] / total {
        out[0]
    } else {
        out[1]
    }
}

/// Four outflows are weighted by squared speed, unlike the two and three
/// branch cases.
fn four_way(out: &[Candidate], u: f64) -> Candidate {
    let s: Vec<f64> = out.iter().take(4).map(|c| c.speed_sq).collect();
    let total: f64 = s.iter().sum();
    if total <= 0.0 {
        return out[1];
    }
    if u > (s[0] + s[1] + s[2]) / total {
        out[3]
    } else if u > (s[0] + s[1]) / total {
        out[2]
    } else if u <= s[0] / total {
        out[0]
    } else {
        out[1]
    }
}

/// Streamline routing: two outflows are split by the incoming streamline;
/// any other count falls back to complete mixing. A still incoming cell
/// sends the particle to the adjacent branch.
pub fn streamline_routing(junction: &Junction, u: f64) -> Option<Candidate> {
    let out = junction.outflows();
    if out.len() != 2 {
        return complete_mixing(junction, u);
    }
    let incoming = junction.incoming_speed_sq();
    let root_in = incoming.sqrt();

    if out[0].fracture == out[1].fracture {
        if incoming <= 0.0 {
            return complete_mixing(junction, u);
        }
        return Some(discontinuous(out[0], out[1], root_in, u));
    }

    let (adjacent, opposite) = match out.iter().position(|c| c.fracture == junction.prev_fracture) {
        Some(0) => (out[1], out[0]),
        _ => (out[0], out[1]),
    };
    if incoming <= adjacent.speed_sq || u <= adjacent.speed_sq.sqrt() / root_in {
        Some(adjacent)
    } else {
        Some(opposite)
    }
}

fn discontinuous(first: Candidate, second: Candidate, root_in: f64, u: f64) -> Candidate {
    let (r0, r1) = (first.speed_sq.sqrt(), second.speed_sq.sqrt());
    if root_in >= (r0 + r1) / 2.0 {
        if second.speed_sq >= first.speed_sq {
            if u >= r1 / root_in { first } else { second }
        } else if u >= r0 / root_in {
            second
        } else {
            first
        }
    } else {
        let speedopp = r0 + r1 - root_in;
        if second.speed_sq <= first.speed_sq {
            if u <= (r0 - speedopp) / root_in && r0 >= speedopp {
                first
            } else {
                second
            }
        } else if u <= (r1 - speedopp) / root_in && r1 >= speedopp {
            second
        } else {
            first
        }
    }
}
