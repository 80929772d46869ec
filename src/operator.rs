use crate::bitset::UnitSet;
use crate::error::{MatchmakingError, Result};
use crate::team_finder::FeasibleTeam;
use crate::types::*;

/// Compatibility rules and team merging used by every search stage
pub trait AffinityOperator {
    /// Can the two units share a team? Requires room for both and mutual
    /// rank/skill containment.
    fn is_fit_one_team(&self, unit1: &MatchUnit, unit2: &MatchUnit) -> bool;

    /// Can the two units sit on opposing teams of the same game?
    fn is_unit_fit_one_game(&self, unit1: &MatchUnit, unit2: &MatchUnit) -> bool;

    /// Can the two teams play each other? Teams must not share units.
    fn is_fit_one_game(&self, team1: &FeasibleTeam, team2: &FeasibleTeam) -> bool;

    /// Fold the selected units into a team and bring its affinity up to
    /// `current_timestamp`.
    fn merge_units_to_team(
        &self,
        units: &[MatchUnit],
        members: &UnitSet,
        current_timestamp: i64,
    ) -> Result<FeasibleTeam>;

    /// Chance that `unit1` beats `unit2`
    fn win_probability(&self, unit1: &MatchUnit, unit2: &MatchUnit) -> f64;
}

/// Rank/skill window operator
#[derive(Clone, Debug)]
pub struct DefaultAffinityOperator {
    criteria: MatchmakingCriteria,
    time_config: TimeVaryingConfig,
}

/// Skill gap that turns into 10:1 odds
const WIN_PROBABILITY_SCALE: f64 = 400.0;

impl DefaultAffinityOperator {
    pub fn new(criteria: MatchmakingCriteria, time_config: TimeVaryingConfig) -> Self {
        Self {
            criteria,
            time_config,
        }
    }

    pub fn criteria(&self) -> &MatchmakingCriteria {
        &self.criteria
    }

    pub fn time_config(&self) -> &TimeVaryingConfig {
        &self.time_config
    }
}

impl AffinityOperator for DefaultAffinityOperator {
    fn is_fit_one_team(&self, unit1: &MatchUnit, unit2: &MatchUnit) -> bool {
        if unit1.member_count() + unit2.member_count() > self.criteria.users_per_team {
            return false;
        }
        unit1.affinity.is_compatible(&unit2.affinity)
    }

    fn is_unit_fit_one_game(&self, unit1: &MatchUnit, unit2: &MatchUnit) -> bool {
        if unit1.id == unit2.id
            || unit1
                .member_ids()
                .iter()
                .any(|m| unit2.member_ids().contains(m))
        {
            return false;
        }
        unit1.affinity.is_compatible(&unit2.affinity)
    }

    fn is_fit_one_game(&self, team1: &FeasibleTeam, team2: &FeasibleTeam) -> bool {
        if team1.members.intersects(&team2.members) {
            return false;
        }
        team1.affinity.is_compatible(&team2.affinity)
    }

    fn merge_units_to_team(
        &self,
        units: &[MatchUnit],
        members: &UnitSet,
        current_timestamp: i64,
    ) -> Result<FeasibleTeam> {
        if members.upper_bound() > units.len() {
            return Err(MatchmakingError::InvalidSelection(format!(
                "member index {} outside snapshot of {} units",
                members.upper_bound() - 1,
                units.len()
            )));
        }

        let mut indices = members.iter();
        let first = indices.next().ok_or_else(|| {
            MatchmakingError::InvalidSelection("cannot merge an empty member set".to_string())
        })?;

        let mut affinity = units[first].affinity.clone();
        let mut user_count = units[first].member_count();
        for idx in indices {
            affinity.merge(&units[idx].affinity);
            user_count += units[idx].member_count();
        }
        // The team is a new state: widen it for the full wait, whatever
        // cooldown its members are in.
        affinity.last_update_timestamp = None;
        affinity.update(current_timestamp, &self.time_config);

        Ok(FeasibleTeam {
            members: members.clone(),
            affinity,
            user_count,
        })
    }

    fn win_probability(&self, unit1: &MatchUnit, unit2: &MatchUnit) -> f64 {
        let diff = unit1.affinity.skill - unit2.affinity.skill;
        1.0 / (1.0 + 10f64.powf(-diff / WIN_PROBABILITY_SCALE))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn unit(id: u64, members: usize, rank: i32, skill: f64, enter: i64) -> MatchUnit {
        MatchUnit::new(
            id,
            (0..members as u64).map(|m| id * 100 + m).collect(),
            HashMap::new(),
            0.5,
            AffinityState::new(enter, rank, skill, 1 << (id % 5)),
        )
        .unwrap()
    }

    fn operator() -> DefaultAffinityOperator {
        DefaultAffinityOperator::new(MatchmakingCriteria::new(2, 5), TimeVaryingConfig::default())
    }

    #[test]
    fn test_team_fit_rejects_oversized_pair() {
        let op = operator();
        let a = unit(1, 3, 5, 10.0, 0);
        let b = unit(2, 3, 5, 10.0, 0);
        assert!(!op.is_fit_one_team(&a, &b), "3 + 3 users exceed a team of 5");

        let c = unit(3, 2, 5, 10.0, 0);
        assert!(op.is_fit_one_team(&a, &c));
    }

    #[test]
    fn test_rank_gap_closes_with_time() {
        let op = operator();
        let config = TimeVaryingConfig::default();
        let mut low = unit(1, 1, 2, 10.0, 0);
        let mut high = unit(2, 1, 6, 10.0, 0);
        low.affinity.update(0, &config);
        high.affinity.update(0, &config);
        assert!(!op.is_fit_one_team(&low, &high));

        // Four windows: each side widens by 4
        low.affinity.update(240, &config);
        high.affinity.update(240, &config);
        assert!(op.is_fit_one_team(&low, &high));
    }

    #[test]
    fn test_units_in_one_game_must_be_distinct() {
        let op = operator();
        let a = unit(1, 1, 5, 10.0, 0);
        assert!(!op.is_unit_fit_one_game(&a, &a.clone()));
        let b = unit(2, 1, 5, 10.0, 0);
        assert!(op.is_unit_fit_one_game(&a, &b));
    }

    #[test]
    fn test_merge_units_to_team() {
        let op = operator();
        let units = vec![
            unit(1, 1, 3, 10.0, 100),
            unit(2, 2, 7, 20.0, 300),
            unit(3, 2, 5, 15.0, 200),
        ];
        let members: UnitSet = [0, 1, 2].into_iter().collect();
        let team = op.merge_units_to_team(&units, &members, 300).unwrap();
        assert_eq!(team.user_count, 5);
        assert_eq!(team.affinity.rank, 7);
        assert_eq!(team.affinity.skill, 20.0);
        assert_eq!(team.affinity.enter_timestamp, 300);
        assert_eq!(team.affinity.last_update_timestamp, Some(300));
        assert_eq!(team.affinity.positions, 0b1110);
    }

    #[test]
    fn test_merged_team_widens_despite_member_cooldown() {
        let op = DefaultAffinityOperator::new(MatchmakingCriteria::new(2, 2), TimeVaryingConfig::default());
        let config = TimeVaryingConfig::default();
        let mut units = vec![unit(1, 1, 1, 10.0, 0), unit(2, 1, 1, 10.0, 0), unit(3, 2, 3, 10.0, 0)];
        for u in &mut units {
            u.affinity.update(300, &config);
        }

        let pair: UnitSet = [0, 1].into_iter().collect();
        let merged = op.merge_units_to_team(&units, &pair, 300).unwrap();
        assert_eq!(merged.affinity.matched_rank_range, ClosedRange::new(-4, 6));

        let duo: UnitSet = [2].into_iter().collect();
        let single = op.merge_units_to_team(&units, &duo, 300).unwrap();
        assert_eq!(single.affinity.matched_rank_range, ClosedRange::new(-2, 8));
        assert!(op.is_fit_one_game(&merged, &single));
    }

    #[test]
    fn test_merge_rejects_empty_or_out_of_range() {
        let op = operator();
        let units = vec![unit(1, 1, 3, 10.0, 0)];
        let empty = UnitSet::with_capacity(1);
        assert!(matches!(
            op.merge_units_to_team(&units, &empty, 0),
            Err(MatchmakingError::InvalidSelection(_))
        ));

        let outside: UnitSet = [4].into_iter().collect();
        assert!(matches!(
            op.merge_units_to_team(&units, &outside, 0),
            Err(MatchmakingError::InvalidSelection(_))
        ));
    }

    #[test]
    fn test_win_probability_is_monotone() {
        let op = operator();
        let base = unit(1, 1, 5, 1000.0, 0);
        let even = op.win_probability(&base, &unit(2, 1, 5, 1000.0, 0));
        assert!((even - 0.5).abs() < 1e-12);

        let mut previous = 1.0;
        for skill in [900.0, 1000.0, 1100.0, 1400.0] {
            let p = op.win_probability(&base, &unit(3, 1, 5, skill, 0));
            assert!(p < previous, "stronger opponent should lower the odds");
            previous = p;
        }
    }
}
