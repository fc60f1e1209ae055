use crate::model::*;

use super::error::LifecycleError;

/// Threshold ladder for no-show bans.
///
/// Every `temp_ban_threshold` no-shows earns one temporary ban of
/// `temp_ban_duration`. The `permanent_after_temp_bans`-th temporary ban is
/// escalated to a permanent ban instead. Counts never decay.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BanPolicy {
    pub temp_ban_threshold: u32,
    pub temp_ban_duration: Ms,
    /// Zero disables escalation.
    pub permanent_after_temp_bans: u32,
}

impl Default for BanPolicy {
    fn default() -> Self {
        Self {
            temp_ban_threshold: 3,
            temp_ban_duration: 7 * DAY,
            permanent_after_temp_bans: 3,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BanOutcome {
    /// Infraction counted, no new ban.
    Counted,
    Temporary { until: Ms },
    Permanent,
}

impl BanOutcome {
    pub fn label(&self) -> &'static str {
        match self {
            BanOutcome::Counted => "counted",
            BanOutcome::Temporary { .. } => "temporary",
            BanOutcome::Permanent => "permanent",
        }
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct NoShowBanAccumulator {
    pub policy: BanPolicy,
}

impl NoShowBanAccumulator {
    pub fn new(policy: BanPolicy) -> Self {
        Self { policy }
    }

    /// Fold one no-show into `record`, returning the successor record.
    pub fn record_no_show(&self, record: &BanRecord, now: Ms) -> (BanRecord, BanOutcome) {
        let p = &self.policy;
        let mut next = record.clone();
        next.no_show_count = next.no_show_count.saturating_add(1);

        if next.permanent_ban || p.temp_ban_threshold == 0 || next.no_show_count % p.temp_ban_threshold != 0 {
            return (next, BanOutcome::Counted);
        }

        next.temp_ban_count = next.temp_ban_count.saturating_add(1);
        if p.permanent_after_temp_bans != 0 && next.temp_ban_count >= p.permanent_after_temp_bans {
            next.permanent_ban = true;
            next.ban_until = None;
            return (next, BanOutcome::Permanent);
        }

        let until = now.saturating_add(p.temp_ban_duration);
        let until = next.ban_until.map_or(until, |existing| existing.max(until));
        next.ban_until = Some(until);
        (next, BanOutcome::Temporary { until })
    }

    /// Bans gate reservation creation only.
    pub fn check_creation(&self, record: Option<&BanRecord>, now: Ms) -> Result<(), LifecycleError> {
        match record.map(|r| r.state(now)) {
            Some(BanState::Permanent) => Err(LifecycleError::AlreadyBanned { until: None }),
            Some(BanState::Temporary { until }) => Err(LifecycleError::AlreadyBanned { until: Some(until) }),
            Some(BanState::Clear) | None => Ok(()),
        }
    }

    /// Manual review outcome: lift any ban but keep the infraction history.
    pub fn lift(&self, record: &BanRecord) -> BanRecord {
        BanRecord {
            ban_until: None,
            permanent_ban: false,
            ..record.clone()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ulid::Ulid;

    const T0: Ms = 1_767_261_600_000;

    fn accumulate(acc: &NoShowBanAccumulator, n: u32, now: Ms) -> (BanRecord, Vec<BanOutcome>) {
        let mut rec = BanRecord::new(Ulid::new());
        let mut outcomes = Vec::new();
        for _ in 0..n {
            let (next, outcome) = acc.record_no_show(&rec, now);
            rec = next;
            outcomes.push(outcome);
        }
        (rec, outcomes)
    }

    #[test]
    fn third_no_show_bans_for_seven_days() {
        let acc = NoShowBanAccumulator::default();
        let (rec, outcomes) = accumulate(&acc, 2, T0);
        assert_eq!(rec.no_show_count, 2);
        assert_eq!(rec.ban_until, None);
        assert!(outcomes.iter().all(|o| *o == BanOutcome::Counted));

        let (rec, outcome) = acc.record_no_show(&rec, T0);
        assert_eq!(rec.no_show_count, 3);
        assert_eq!(outcome, BanOutcome::Temporary { until: T0 + 7 * DAY });
        assert_eq!(rec.ban_until, Some(T0 + 7 * DAY));
        assert!(!rec.permanent_ban);
    }

    #[test]
    fn escalates_to_permanent_on_third_ban() {
        let acc = NoShowBanAccumulator::default();
        let (rec, outcomes) = accumulate(&acc, 9, T0);
        assert_eq!(outcomes[5], BanOutcome::Temporary { until: T0 + 7 * DAY });
        assert_eq!(outcomes[8], BanOutcome::Permanent);
        assert!(rec.permanent_ban);
        assert_eq!(rec.ban_until, None);
        assert_eq!(rec.temp_ban_count, 3);

        // Further infractions are still counted.
        let (rec, outcome) = acc.record_no_show(&rec, T0);
        assert_eq!(outcome, BanOutcome::Counted);
        assert_eq!(rec.no_show_count, 10);
        assert!(rec.permanent_ban);
    }

    #[test]
    fn escalation_can_be_disabled() {
        let acc = NoShowBanAccumulator::new(BanPolicy {
            permanent_after_temp_bans: 0,
            ..BanPolicy::default()
        });
        let (rec, _) = accumulate(&acc, 30, T0);
        assert!(!rec.permanent_ban);
        assert_eq!(rec.temp_ban_count, 10);
    }

    #[test]
    fn creation_gate() {
        let acc = NoShowBanAccumulator::default();
        assert!(acc.check_creation(None, T0).is_ok());

        let mut rec = BanRecord::new(Ulid::new());
        rec.ban_until = Some(T0 + DAY);
        assert_eq!(
            acc.check_creation(Some(&rec), T0),
            Err(LifecycleError::AlreadyBanned { until: Some(T0 + DAY) })
        );
        assert!(acc.check_creation(Some(&rec), T0 + DAY).is_ok());

        rec.permanent_ban = true;
        assert_eq!(
            acc.check_creation(Some(&rec), T0 + 30 * DAY),
            Err(LifecycleError::AlreadyBanned { until: None })
        );
    }

    #[test]
    fn lift_keeps_counts() {
        let acc = NoShowBanAccumulator::default();
        let (rec, _) = accumulate(&acc, 9, T0);
        let lifted = acc.lift(&rec);
        assert_eq!(lifted.state(T0), BanState::Clear);
        assert_eq!(lifted.no_show_count, 9);
        assert_eq!(lifted.temp_ban_count, 3);
    }
}
