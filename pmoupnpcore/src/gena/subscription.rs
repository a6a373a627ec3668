//! Machine à états d'un abonnement GENA, commune aux deux rôles.
//!
//! ```text
//! Established ──▶ Renewing ──▶ Established
//!      │              │
//!      └──────┬───────┘
//!             ▼
//!   Ended(NoSubscriber | NotFound | DeviceShutdown | UnsubscribeComplete)
//! ```
//!
//! Aucun passage ne quitte un état terminal.

use std::fmt;

use tokio::task::AbortHandle;

use crate::errors::SubscriptionFailureReason;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EndReason {
    NoSubscriber,
    NotFound,
    DeviceShutdown,
    UnsubscribeComplete,
}

impl EndReason {
    /// Raison d'échec correspondante, `None` pour une fin demandée.
    pub fn failure_reason(&self) -> Option<SubscriptionFailureReason> {
        match self {
            EndReason::NoSubscriber => Some(SubscriptionFailureReason::NoSubscriber),
            EndReason::NotFound => Some(SubscriptionFailureReason::NotFound),
            EndReason::DeviceShutdown => Some(SubscriptionFailureReason::DeviceShutdown),
            EndReason::UnsubscribeComplete => None,
        }
    }
}

impl fmt::Display for EndReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            EndReason::NoSubscriber => "NO_SUBSCRIBER",
            EndReason::NotFound => "NOT_FOUND",
            EndReason::DeviceShutdown => "DEVICE_SHUTDOWN",
            EndReason::UnsubscribeComplete => "UNSUBSCRIBE_COMPLETE",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SubscriptionState {
    Established,
    Renewing,
    Ended(EndReason),
}

impl SubscriptionState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, SubscriptionState::Ended(_))
    }

    pub fn is_active(&self) -> bool {
        !self.is_terminal()
    }
}

/// État + minuterie d'un abonnement.
///
/// Chaque armement ou annulation incrémente `generation`. Une minuterie
/// déclenchée ne doit agir que si la génération qu'elle a reçue est toujours
/// la courante : une annulation qui perd la course n'a alors aucun effet.
#[derive(Debug)]
pub struct SubscriptionLifecycle {
    state: SubscriptionState,
    generation: u64,
    timer: Option<AbortHandle>,
}

impl Default for SubscriptionLifecycle {
    fn default() -> Self {
        Self {
            state: SubscriptionState::Established,
            generation: 0,
            timer: None,
        }
    }
}

impl SubscriptionLifecycle {
    pub fn state(&self) -> SubscriptionState {
        self.state
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    /// Applique une transition ; refusée depuis un état terminal.
    pub fn transition(&mut self, to: SubscriptionState) -> bool {
        if self.state.is_terminal() {
            return false;
        }
        self.state = to;
        if to.is_terminal() {
            self.cancel_timer();
        }
        true
    }

    /// Réserve une génération pour une minuterie à venir.
    pub fn next_generation(&mut self) -> u64 {
        self.cancel_timer();
        self.generation
    }

    /// Associe la tâche de la minuterie à la génération réservée.
    pub fn attach_timer(&mut self, generation: u64, handle: AbortHandle) {
        if generation == self.generation && !self.state.is_terminal() {
            self.timer = Some(handle);
        } else {
            handle.abort();
        }
    }

    /// Vrai si une minuterie de génération `generation` peut encore agir.
    pub fn is_current(&self, generation: u64) -> bool {
        generation == self.generation && !self.state.is_terminal()
    }

    /// Invalide la minuterie courante sans interrompre sa tâche : à appeler
    /// depuis cette tâche, qui doit encore poursuivre son travail.
    pub fn disarm(&mut self) {
        self.generation = self.generation.wrapping_add(1);
        self.timer = None;
    }

    pub fn cancel_timer(&mut self) {
        self.generation = self.generation.wrapping_add(1);
        if let Some(handle) = self.timer.take() {
            handle.abort();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_terminal_state_is_final() {
        let mut lc = SubscriptionLifecycle::default();
        assert!(lc.transition(SubscriptionState::Renewing));
        assert!(lc.transition(SubscriptionState::Established));
        assert!(lc.transition(SubscriptionState::Ended(EndReason::NotFound)));
        assert!(!lc.transition(SubscriptionState::Established));
        assert!(!lc.transition(SubscriptionState::Ended(EndReason::UnsubscribeComplete)));
        assert_eq!(lc.state(), SubscriptionState::Ended(EndReason::NotFound));
    }

    #[test]
    fn test_cancelled_generation_is_stale() {
        let mut lc = SubscriptionLifecycle::default();
        let g = lc.next_generation();
        assert!(lc.is_current(g));
        lc.cancel_timer();
        assert!(!lc.is_current(g));
        let g2 = lc.next_generation();
        assert!(lc.is_current(g2));
        lc.transition(SubscriptionState::Ended(EndReason::NoSubscriber));
        assert!(!lc.is_current(g2));
    }

    #[test]
    fn test_end_reason_maps_to_failure() {
        assert_eq!(
            EndReason::DeviceShutdown.failure_reason(),
            Some(SubscriptionFailureReason::DeviceShutdown)
        );
        assert_eq!(EndReason::UnsubscribeComplete.failure_reason(), None);
        assert_eq!(EndReason::NoSubscriber.to_string(), "NO_SUBSCRIBER");
    }
}
