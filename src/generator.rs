use crate::error::Result;
use crate::types::*;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::collections::HashMap;

/// Seconds before `current_timestamp` in which generated units entered
const ENTER_WINDOW: i64 = 10 * 60;

/// Monotonic id source, owned by whoever creates units
#[derive(Clone, Debug)]
pub struct IdGenerator {
    next: u64,
}

impl Default for IdGenerator {
    fn default() -> Self {
        Self::new(1)
    }
}

impl IdGenerator {
    pub fn new(first: u64) -> Self {
        Self { next: first }
    }

    pub fn next_id(&mut self) -> u64 {
        let id = self.next;
        self.next += 1;
        id
    }

    /// The id the next call hands out
    pub fn peek(&self) -> u64 {
        self.next
    }

    /// Never hand out `id` or anything below it
    pub fn advance_past(&mut self, id: u64) {
        self.next = self.next.max(id.saturating_add(1));
    }
}

/// Seeded source of synthetic match units
pub struct PoolGenerator {
    criteria: MatchmakingCriteria,
    rng: StdRng,
    unit_ids: IdGenerator,
    member_ids: IdGenerator,
}

impl PoolGenerator {
    pub fn new(criteria: MatchmakingCriteria, seed: u64) -> Self {
        Self::with_ids(criteria, seed, IdGenerator::default(), IdGenerator::default())
    }

    pub fn with_ids(
        criteria: MatchmakingCriteria,
        seed: u64,
        unit_ids: IdGenerator,
        member_ids: IdGenerator,
    ) -> Self {
        Self {
            criteria,
            rng: StdRng::seed_from_u64(seed),
            unit_ids,
            member_ids,
        }
    }

    /// Keep later units clear of ids already taken elsewhere
    pub fn skip_ids_past(&mut self, unit_id: u64, member_id: u64) {
        self.unit_ids.advance_past(unit_id);
        self.member_ids.advance_past(member_id);
    }

    /// Later units follow `criteria`; ids keep counting
    pub fn set_criteria(&mut self, criteria: MatchmakingCriteria) {
        self.criteria = criteria;
    }

    /// A party of 1..=users_per_team members that entered within the last
    /// ten minutes, with random positions, relay latencies, rank and skill.
    pub fn random_unit(&mut self, current_timestamp: i64) -> Result<MatchUnit> {
        let enter = current_timestamp - ENTER_WINDOW + self.rng.gen_range(0..ENTER_WINDOW);
        let members = self.rng.gen_range(1..=self.criteria.users_per_team.max(1));
        let member_ids = (0..members).map(|_| self.member_ids.next_id()).collect();

        let mut positions = 0u64;
        for bit in 0..self.criteria.max_positions.min(64) {
            if self.rng.gen_bool(0.5) {
                positions |= 1 << bit;
            }
        }
        let relays: HashMap<u32, u32> = (0..self.criteria.max_relay_groups as u32)
            .map(|group| (group, self.rng.gen_range(0..999)))
            .collect();

        let rank = self.rng.gen_range(1..=(self.criteria.max_rank / 4).max(1));
        let skill = 3.0 + self.rng.gen::<f64>();
        let win_probability = self.rng.gen::<f64>();

        MatchUnit::new(
            self.unit_ids.next_id(),
            member_ids,
            relays,
            win_probability,
            AffinityState::new(enter, rank, skill, positions),
        )
    }

    pub fn random_units(&mut self, count: usize, current_timestamp: i64) -> Result<Vec<MatchUnit>> {
        (0..count).map(|_| self.random_unit(current_timestamp)).collect()
    }

    /// A unit that is compatible with every other uniform unit: rank 2,
    /// skill 1.0, every position covered, entered at `current_timestamp`.
    pub fn uniform_unit(&mut self, members: usize, current_timestamp: i64) -> Result<MatchUnit> {
        let member_ids = (0..members).map(|_| self.member_ids.next_id()).collect();
        let positions = match self.criteria.max_positions {
            0 => 0,
            n if n >= 64 => u64::MAX,
            n => (1u64 << n) - 1,
        };
        let relays = (0..self.criteria.max_relay_groups as u32)
            .map(|group| (group, self.rng.gen_range(0..999)))
            .collect();
        MatchUnit::new(
            self.unit_ids.next_id(),
            member_ids,
            relays,
            0.5,
            AffinityState::new(current_timestamp, 2, 1.0, positions),
        )
    }
}
