//! Modération des évènements, par abonnement et par variable.
//!
//! * `minimum_delta` : un changement numérique plus petit que le delta par
//!   rapport à la dernière valeur envoyée est abandonné.
//! * `maximum_rate` : un changement survenant moins de `maximum_rate` après le
//!   dernier envoi est retenu, puis émis à l'échéance (seule la dernière
//!   valeur retenue compte).

use std::collections::HashMap;

use tokio::time::Instant;
use tracing::trace;

use crate::model::StateVariable;
use crate::variable_types::StateValue;

#[derive(Debug, Default, Clone, PartialEq)]
pub struct Moderated {
    /// Valeurs à notifier immédiatement.
    pub send: Vec<(String, StateValue)>,
    /// Échéance de la prochaine valeur retenue, s'il y en a.
    pub flush_at: Option<Instant>,
}

#[derive(Debug, Default)]
pub struct Moderator {
    last_sent: HashMap<String, (StateValue, Instant)>,
    pending: Vec<(String, StateValue)>,
}

impl Moderator {
    /// Initialise avec l'évènement initial, considéré comme envoyé à `now`.
    pub fn new(initial: &[(String, StateValue)], now: Instant) -> Self {
        let mut moderator = Self::default();
        moderator.record(initial, now);
        moderator
    }

    fn record(&mut self, sent: &[(String, StateValue)], now: Instant) {
        for (name, value) in sent {
            self.last_sent.insert(name.clone(), (value.clone(), now));
            self.pending.retain(|(n, _)| n != name);
        }
    }

    fn hold(&mut self, name: &str, value: &StateValue) {
        match self.pending.iter_mut().find(|(n, _)| n == name) {
            Some((_, v)) => *v = value.clone(),
            None => self.pending.push((name.to_string(), value.clone())),
        }
    }

    fn release_at(&self, name: &str, variables: &[StateVariable]) -> Option<Instant> {
        let rate = variables.iter().find(|v| v.name == name)?.moderation.maximum_rate?;
        self.last_sent.get(name).map(|(_, at)| *at + rate)
    }

    fn next_flush(&self, variables: &[StateVariable]) -> Option<Instant> {
        self.pending
            .iter()
            .filter_map(|(name, _)| self.release_at(name, variables))
            .min()
    }

    pub fn filter(
        &mut self,
        changes: &[(String, StateValue)],
        variables: &[StateVariable],
        now: Instant,
    ) -> Moderated {
        let mut send = Vec::new();
        for (name, value) in changes {
            let Some(def) = variables.iter().find(|v| v.name == *name) else {
                send.push((name.clone(), value.clone()));
                continue;
            };

            if let (Some(delta), Some(new), Some((last, _))) = (
                def.moderation.minimum_delta,
                value.as_f64(),
                self.last_sent.get(name),
            ) {
                if let Some(old) = last.as_f64() {
                    if (new - old).abs() < delta {
                        trace!("Moderation: dropping {} = {} (delta < {})", name, value, delta);
                        continue;
                    }
                }
            }

            match self.release_at(name, variables) {
                Some(at) if now < at => {
                    trace!("Moderation: holding {} = {}", name, value);
                    self.hold(name, value);
                }
                _ => send.push((name.clone(), value.clone())),
            }
        }
        self.record(&send, now);
        Moderated {
            send,
            flush_at: self.next_flush(variables),
        }
    }

    /// Libère les valeurs retenues arrivées à échéance.
    pub fn flush(&mut self, variables: &[StateVariable], now: Instant) -> Moderated {
        let (due, kept): (Vec<_>, Vec<_>) = std::mem::take(&mut self.pending)
            .into_iter()
            .partition(|(name, _)| self.release_at(name, variables).is_none_or(|at| at <= now));
        self.pending = kept;
        self.record(&due, now);
        Moderated {
            send: due,
            flush_at: self.next_flush(variables),
        }
    }

    pub fn has_pending(&self) -> bool {
        !self.pending.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::variable_types::StateVarType;
    use std::time::Duration;

    fn vars() -> Vec<StateVariable> {
        vec![
            StateVariable::builder("Volume", StateVarType::UI2)
                .minimum_delta(5.0)
                .build()
                .unwrap(),
            StateVariable::builder("Position", StateVarType::String)
                .maximum_rate(Duration::from_secs(2))
                .build()
                .unwrap(),
            StateVariable::builder("Mute", StateVarType::Boolean).build().unwrap(),
        ]
    }

    fn initial() -> Vec<(String, StateValue)> {
        vec![
            ("Volume".to_string(), StateValue::UI2(10)),
            ("Position".to_string(), StateValue::String("0".to_string())),
            ("Mute".to_string(), StateValue::Boolean(false)),
        ]
    }

    #[test]
    fn test_minimum_delta_drops_small_changes() {
        let now = Instant::now();
        let vars = vars();
        let mut m = Moderator::new(&initial(), now);

        let out = m.filter(&[("Volume".to_string(), StateValue::UI2(13))], &vars, now);
        assert!(out.send.is_empty());
        assert!(out.flush_at.is_none());

        let out = m.filter(&[("Volume".to_string(), StateValue::UI2(15))], &vars, now);
        assert_eq!(out.send, vec![("Volume".to_string(), StateValue::UI2(15))]);
    }

    #[test]
    fn test_maximum_rate_holds_then_flushes_latest() {
        let t0 = Instant::now();
        let vars = vars();
        let mut m = Moderator::new(&initial(), t0);

        let t1 = t0 + Duration::from_millis(500);
        let out = m.filter(
            &[
                ("Position".to_string(), StateValue::String("1".to_string())),
                ("Mute".to_string(), StateValue::Boolean(true)),
            ],
            &vars,
            t1,
        );
        assert_eq!(out.send, vec![("Mute".to_string(), StateValue::Boolean(true))]);
        assert_eq!(out.flush_at, Some(t0 + Duration::from_secs(2)));

        let out = m.filter(&[("Position".to_string(), StateValue::String("2".to_string()))], &vars, t1);
        assert!(out.send.is_empty());

        assert!(m.flush(&vars, t1).send.is_empty());
        let out = m.flush(&vars, t0 + Duration::from_secs(2));
        assert_eq!(out.send, vec![("Position".to_string(), StateValue::String("2".to_string()))]);
        assert!(out.flush_at.is_none());
        assert!(!m.has_pending());
    }
}
