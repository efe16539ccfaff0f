//! Phase-to-agent mapping.
//!
//! Onboarding phases are numbered `1..=N`. Each onboarding agent owns one
//! contiguous range of phases; together the ranges cover `[1, N]` with no
//! gaps and no overlaps. Violations are configuration bugs and are rejected
//! when the map is built.

use crate::error::PhaseMapError;

use super::kind::AgentKind;

/// One agent's contiguous block of phases (inclusive).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PhaseRange {
    pub agent: AgentKind,
    pub start: u32,
    pub end: u32,
}

impl PhaseRange {
    pub fn new(agent: AgentKind, start: u32, end: u32) -> Self {
        Self { agent, start, end }
    }

    pub fn single(agent: AgentKind, phase: u32) -> Self {
        Self::new(agent, phase, phase)
    }

    fn contains(&self, phase: u32) -> bool {
        (self.start..=self.end).contains(&phase)
    }
}

/// Validated phase map. Ranges are kept sorted by start phase.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PhaseMap {
    ranges: Vec<PhaseRange>,
}

impl PhaseMap {
    /// Build a map, rejecting gaps, overlaps, and non-onboarding agents.
    pub fn new(mut ranges: Vec<PhaseRange>) -> Result<Self, PhaseMapError> {
        if ranges.is_empty() {
            return Err(PhaseMapError::Empty);
        }

        for (i, range) in ranges.iter().enumerate() {
            if !range.agent.is_phase_agent() {
                return Err(PhaseMapError::NotAPhaseAgent { agent: range.agent });
            }
            if range.start == 0 || range.start > range.end {
                return Err(PhaseMapError::InvalidRange {
                    agent: range.agent,
                    start: range.start,
                    end: range.end,
                });
            }
            if ranges[..i].iter().any(|r| r.agent == range.agent) {
                return Err(PhaseMapError::DuplicateAgent { agent: range.agent });
            }
        }

        ranges.sort_by_key(|r| r.start);

        if ranges[0].start != 1 {
            return Err(PhaseMapError::DoesNotStartAtOne {
                first: ranges[0].start,
            });
        }

        for pair in ranges.windows(2) {
            let (prev, next) = (pair[0], pair[1]);
            if next.start <= prev.end {
                return Err(PhaseMapError::Overlap { phase: next.start });
            }
            if next.start != prev.end + 1 {
                return Err(PhaseMapError::Gap {
                    after: prev.end,
                    next: next.start,
                });
            }
        }

        Ok(Self { ranges })
    }

    /// The default four-phase onboarding: one phase per agent.
    pub fn standard() -> Self {
        Self {
            ranges: vec![
                PhaseRange::single(AgentKind::Assessment, 1),
                PhaseRange::single(AgentKind::GoalSetting, 2),
                PhaseRange::single(AgentKind::ProgramDesign, 3),
                PhaseRange::single(AgentKind::Scheduling, 4),
            ],
        }
    }

    /// Parse `"assessment:1-2,goal_setting:3,program_design:4-6"`.
    pub fn parse(text: &str) -> Result<Self, PhaseMapError> {
        let mut ranges = Vec::new();
        for entry in text.split(',').map(str::trim).filter(|e| !e.is_empty()) {
            let (label, span) = entry
                .split_once(':')
                .ok_or_else(|| PhaseMapError::Parse(format!("missing ':' in '{entry}'")))?;
            let agent: AgentKind = label
                .parse()
                .map_err(|e| PhaseMapError::Parse(format!("{e}")))?;
            let (start, end) = match span.split_once('-') {
                Some((a, b)) => (parse_phase(a)?, parse_phase(b)?),
                None => {
                    let p = parse_phase(span)?;
                    (p, p)
                }
            };
            ranges.push(PhaseRange::new(agent, start, end));
        }
        Self::new(ranges)
    }

    /// N, the last defined phase.
    pub fn phase_count(&self) -> u32 {
        self.ranges.last().map(|r| r.end).unwrap_or(0)
    }

    pub fn ranges(&self) -> &[PhaseRange] {
        &self.ranges
    }

    /// Fails with `OutOfRange` for phases outside `[1, N]`.
    pub fn check_phase(&self, phase: u32) -> Result<(), PhaseMapError> {
        if phase == 0 || phase > self.phase_count() {
            return Err(PhaseMapError::OutOfRange {
                phase,
                max: self.phase_count(),
            });
        }
        Ok(())
    }

    pub fn phase_to_agent(&self, phase: u32) -> Result<AgentKind, PhaseMapError> {
        self.ranges
            .iter()
            .find(|r| r.contains(phase))
            .map(|r| r.agent)
            .ok_or(PhaseMapError::OutOfRange {
                phase,
                max: self.phase_count(),
            })
    }

    /// Inverse of `phase_to_agent`. `None` for agents that own no phases.
    pub fn agent_to_phase_range(&self, agent: AgentKind) -> Option<(u32, u32)> {
        self.ranges
            .iter()
            .find(|r| r.agent == agent)
            .map(|r| (r.start, r.end))
    }
}

impl Default for PhaseMap {
    fn default() -> Self {
        Self::standard()
    }
}

impl std::fmt::Display for PhaseMap {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let parts: Vec<String> = self
            .ranges
            .iter()
            .map(|r| {
                if r.start == r.end {
                    format!("{}:{}", r.agent, r.start)
                } else {
                    format!("{}:{}-{}", r.agent, r.start, r.end)
                }
            })
            .collect();
        write!(f, "{}", parts.join(","))
    }
}

fn parse_phase(s: &str) -> Result<u32, PhaseMapError> {
    s.trim()
        .parse()
        .map_err(|_| PhaseMapError::Parse(format!("'{}' is not a phase number", s.trim())))
}
