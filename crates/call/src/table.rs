//! Uebergangstabelle der Call State Machine
//!
//! `plan(phase, eingabe)` ist eine reine Funktion: sie liefert die naechste
//! Phase und die auszufuehrenden Aktionen, fasst aber selbst keinen Zustand
//! an. Die Maschine (`machine.rs`) prueft vorher, ob eine Eingabe ueberhaupt
//! zum aktiven Anruf gehoert, und fuehrt danach die Aktionen aus.
//!
//! ```text
//! Idle --StartCall--> Ringing(Out) --CallAccepted--> Negotiating
//! Idle --CallRequest--> Ringing(In) --Accept+Capture--> Negotiating
//! Negotiating --Antwort erzeugt / Antwort gesetzt--> InCall
//! Ringing/Negotiating/InCall --Ende/Fehler/Ablehnung--> Idle
//! ```

use std::fmt;

/// Richtung eines klingelnden Anrufs
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Direction {
    Outgoing,
    Incoming,
}

/// Lokale Sicht auf den 1:1-Anruf
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CallPhase {
    Idle,
    Ringing(Direction),
    Negotiating,
    InCall,
}

impl CallPhase {
    pub const ALL: [CallPhase; 5] = [
        CallPhase::Idle,
        CallPhase::Ringing(Direction::Outgoing),
        CallPhase::Ringing(Direction::Incoming),
        CallPhase::Negotiating,
        CallPhase::InCall,
    ];

    pub fn name(&self) -> &'static str {
        match self {
            CallPhase::Idle => "Idle",
            CallPhase::Ringing(Direction::Outgoing) => "Ringing(out)",
            CallPhase::Ringing(Direction::Incoming) => "Ringing(in)",
            CallPhase::Negotiating => "Negotiating",
            CallPhase::InCall => "InCall",
        }
    }

    pub fn is_idle(&self) -> bool {
        matches!(self, CallPhase::Idle)
    }
}

impl fmt::Display for CallPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Art einer Eingabe, Schluessel der Tabelle
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum InputKind {
    // UI-Befehle
    StartCall,
    AcceptCall,
    RejectCall,
    EndCall,
    // Signale vom Peer
    CallRequest,
    CallAccepted,
    CallRejected,
    CallEnded,
    SessionOffer,
    SessionAnswer,
    RemoteCandidate,
    // Abschluesse asynchroner Schritte
    CaptureReady,
    CaptureFailed,
    SessionReady,
    OfferReady,
    AnswerReady,
    AnswerApplied,
    CandidateAdded,
    StepFailed,
    LocalCandidate,
    GraceElapsed,
    // Verbindung zum Coordinator
    TransportLost,
}

impl InputKind {
    pub const ALL: [InputKind; 22] = [
        InputKind::StartCall,
        InputKind::AcceptCall,
        InputKind::RejectCall,
        InputKind::EndCall,
        InputKind::CallRequest,
        InputKind::CallAccepted,
        InputKind::CallRejected,
        InputKind::CallEnded,
        InputKind::SessionOffer,
        InputKind::SessionAnswer,
        InputKind::RemoteCandidate,
        InputKind::CaptureReady,
        InputKind::CaptureFailed,
        InputKind::SessionReady,
        InputKind::OfferReady,
        InputKind::AnswerReady,
        InputKind::AnswerApplied,
        InputKind::CandidateAdded,
        InputKind::StepFailed,
        InputKind::LocalCandidate,
        InputKind::GraceElapsed,
        InputKind::TransportLost,
    ];

    /// UI-Befehle bekommen bei unpassender Phase einen Fehler zurueck,
    /// alle anderen Eingaben werden still ignoriert
    pub fn is_command(&self) -> bool {
        matches!(
            self,
            InputKind::StartCall | InputKind::AcceptCall | InputKind::RejectCall | InputKind::EndCall
        )
    }
}

/// Seiteneffekt eines Uebergangs
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Action {
    /// Anruf-Datensatz fuer einen ausgehenden Anruf anlegen
    OpenOutgoing,
    /// Anruf-Datensatz fuer einen eingehenden Anruf anlegen, Dialog zeigen
    OpenIncoming,
    AcquireCapture,
    AdoptCapture,
    SendCallRequest,
    SendCallAccepted,
    SendDeclined,
    SendMediaUnavailable,
    ReplyBusy,
    SendCallEnded,
    /// Sitzung anlegen und auf das Angebot warten (Anrufer)
    StartSession,
    /// Sitzung anlegen und Angebot erzeugen (Angerufener)
    StartOffer,
    AdoptSession,
    /// Vor der Sitzung eingetroffenes Angebot beantworten
    ResumePending,
    SendOffer,
    /// Angebot beantworten, Sitzung bei Bedarf anlegen (Anrufer)
    StartAnswer,
    SendAnswer,
    ApplyAnswer,
    AddCandidate,
    ForwardCandidate,
    /// Laufende Schritte abbrechen, Sitzung und Aufnahme freigeben
    Release,
    HidePrompt,
    ShowRejected,
    ShowConnected,
    ShowEnded,
    ShowMediaUnavailable,
    HideCallUi,
    ScheduleRejectGrace,
    ScheduleEndGrace,
}

/// Grund fuer einen abgelehnten UI-Befehl
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Refusal {
    InvalidState,
    Busy,
}

/// Ergebnis eines Tabellen-Lookups
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Plan {
    /// `None`: Phase bleibt
    pub next: Option<CallPhase>,
    pub actions: &'static [Action],
    pub refusal: Option<Refusal>,
}

impl Plan {
    const fn stay(actions: &'static [Action]) -> Self {
        Self {
            next: None,
            actions,
            refusal: None,
        }
    }

    const fn to(next: CallPhase, actions: &'static [Action]) -> Self {
        Self {
            next: Some(next),
            actions,
            refusal: None,
        }
    }

    const fn refuse(refusal: Refusal) -> Self {
        Self {
            next: None,
            actions: &[],
            refusal: Some(refusal),
        }
    }

    const IGNORE: Plan = Plan::stay(&[]);

    pub fn is_ignored(&self) -> bool {
        self.next.is_none() && self.actions.is_empty() && self.refusal.is_none()
    }
}

/// Tabellen-Lookup `(phase, eingabe) -> (naechste Phase, Aktionen)`
pub fn plan(phase: CallPhase, input: InputKind) -> Plan {
    use Action::*;
    use CallPhase::{Idle, InCall, Negotiating, Ringing};
    use Direction::{Incoming, Outgoing};
    use InputKind as K;

    match (phase, input) {
        // --- UI-Befehle ---
        (Idle, K::StartCall) => Plan::to(Ringing(Outgoing), &[OpenOutgoing, AcquireCapture]),
        (_, K::StartCall) => Plan::refuse(Refusal::Busy),

        (Ringing(Incoming), K::AcceptCall) => Plan::stay(&[HidePrompt, AcquireCapture]),
        (_, K::AcceptCall) => Plan::refuse(Refusal::InvalidState),

        (Ringing(Incoming), K::RejectCall) => {
            Plan::to(Idle, &[SendDeclined, Release, HidePrompt, HideCallUi])
        }
        (_, K::RejectCall) => Plan::refuse(Refusal::InvalidState),

        (Ringing(Outgoing) | Negotiating | InCall, K::EndCall) => {
            Plan::to(Idle, &[SendCallEnded, Release, ShowEnded, HideCallUi])
        }
        (_, K::EndCall) => Plan::refuse(Refusal::InvalidState),

        // --- Signale ---
        (Idle, K::CallRequest) => Plan::to(Ringing(Incoming), &[OpenIncoming]),
        (_, K::CallRequest) => Plan::stay(&[ReplyBusy]),

        (Ringing(Outgoing), K::CallAccepted) => Plan::to(Negotiating, &[StartSession]),
        (Ringing(Outgoing), K::CallRejected) => {
            Plan::stay(&[Release, ShowRejected, ScheduleRejectGrace])
        }
        (Ringing(_) | Negotiating | InCall, K::CallEnded) => {
            Plan::to(Idle, &[Release, HidePrompt, ShowEnded, ScheduleEndGrace])
        }

        (Negotiating | InCall, K::SessionOffer) => Plan::stay(&[StartAnswer]),
        (Negotiating | InCall, K::SessionAnswer) => Plan::stay(&[ApplyAnswer]),
        (Negotiating | InCall, K::RemoteCandidate) => Plan::stay(&[AddCandidate]),

        // --- Abschluesse ---
        (Ringing(Outgoing), K::CaptureReady) => Plan::stay(&[AdoptCapture, SendCallRequest]),
        (Ringing(Incoming), K::CaptureReady) => {
            Plan::to(Negotiating, &[AdoptCapture, SendCallAccepted, StartOffer])
        }
        (Ringing(Outgoing), K::CaptureFailed) => {
            Plan::to(Idle, &[Release, ShowMediaUnavailable, HideCallUi])
        }
        (Ringing(Incoming), K::CaptureFailed) => Plan::to(
            Idle,
            &[SendMediaUnavailable, Release, ShowMediaUnavailable, HideCallUi],
        ),

        (Negotiating | InCall, K::SessionReady) => Plan::stay(&[AdoptSession, ResumePending]),
        (Negotiating, K::OfferReady) => Plan::stay(&[AdoptSession, SendOffer]),
        (Negotiating, K::AnswerReady) => {
            Plan::to(InCall, &[AdoptSession, SendAnswer, ShowConnected])
        }
        (InCall, K::AnswerReady) => Plan::stay(&[AdoptSession, SendAnswer]),
        (Negotiating, K::AnswerApplied) => Plan::to(InCall, &[ShowConnected]),

        (Negotiating | InCall, K::StepFailed) => {
            Plan::to(Idle, &[SendCallEnded, Release, ShowEnded, ScheduleEndGrace])
        }
        (Negotiating | InCall, K::LocalCandidate) => Plan::stay(&[ForwardCandidate]),

        (Ringing(Outgoing), K::GraceElapsed) => Plan::to(Idle, &[HideCallUi]),
        (Idle, K::GraceElapsed) => Plan::stay(&[HideCallUi]),

        (Idle, K::TransportLost) => Plan::IGNORE,
        (_, K::TransportLost) => {
            Plan::to(Idle, &[Release, HidePrompt, ShowEnded, HideCallUi])
        }

        _ => Plan::IGNORE,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn alle() -> impl Iterator<Item = (CallPhase, InputKind, Plan)> {
        CallPhase::ALL.into_iter().flat_map(|phase| {
            InputKind::ALL
                .into_iter()
                .map(move |input| (phase, input, plan(phase, input)))
        })
    }

    #[test]
    fn nur_befehle_werden_verweigert() {
        for (phase, input, p) in alle() {
            if p.refusal.is_some() {
                assert!(input.is_command(), "{phase} + {input:?} verweigert");
                assert!(p.next.is_none() && p.actions.is_empty());
            }
        }
    }

    #[test]
    fn start_call_nur_aus_idle() {
        for phase in CallPhase::ALL {
            let p = plan(phase, InputKind::StartCall);
            if phase.is_idle() {
                assert_eq!(p.next, Some(CallPhase::Ringing(Direction::Outgoing)));
                assert!(p.actions.contains(&Action::AcquireCapture));
                assert!(!p.actions.contains(&Action::SendCallRequest));
            } else {
                assert_eq!(p.refusal, Some(Refusal::Busy), "{phase}");
            }
        }
    }

    #[test]
    fn annehmen_und_ablehnen_nur_beim_klingeln() {
        for phase in CallPhase::ALL {
            let erlaubt = phase == CallPhase::Ringing(Direction::Incoming);
            for input in [InputKind::AcceptCall, InputKind::RejectCall] {
                let p = plan(phase, input);
                assert_eq!(p.refusal.is_none(), erlaubt, "{phase} + {input:?}");
            }
        }
    }

    #[test]
    fn auflegen_aus_idle_und_eingehend_verboten() {
        assert_eq!(
            plan(CallPhase::Idle, InputKind::EndCall).refusal,
            Some(Refusal::InvalidState)
        );
        assert_eq!(
            plan(CallPhase::Ringing(Direction::Incoming), InputKind::EndCall).refusal,
            Some(Refusal::InvalidState)
        );
        for phase in [
            CallPhase::Ringing(Direction::Outgoing),
            CallPhase::Negotiating,
            CallPhase::InCall,
        ] {
            let p = plan(phase, InputKind::EndCall);
            assert_eq!(p.next, Some(CallPhase::Idle));
            assert!(p.actions.contains(&Action::SendCallEnded));
        }
    }

    #[test]
    fn besetzt_antwort_ausserhalb_von_idle() {
        for phase in CallPhase::ALL {
            let p = plan(phase, InputKind::CallRequest);
            if phase.is_idle() {
                assert_eq!(p.next, Some(CallPhase::Ringing(Direction::Incoming)));
            } else {
                assert_eq!(p.actions, &[Action::ReplyBusy]);
                assert_eq!(p.next, None);
            }
        }
    }

    #[test]
    fn rueckkehr_nach_idle_gibt_ressourcen_frei() {
        for (phase, input, p) in alle() {
            if phase.is_idle() || p.next != Some(CallPhase::Idle) {
                continue;
            }
            // Nach einer Ablehnung wurde schon beim CallRejected freigegeben
            if input == InputKind::GraceElapsed {
                continue;
            }
            assert!(
                p.actions.contains(&Action::Release),
                "{phase} + {input:?} ohne Release"
            );
        }
    }

    #[test]
    fn in_call_nur_ueber_abgeschlossene_aushandlung() {
        for (phase, input, p) in alle() {
            if p.next == Some(CallPhase::InCall) {
                assert_eq!(phase, CallPhase::Negotiating);
                assert!(
                    matches!(input, InputKind::AnswerReady | InputKind::AnswerApplied),
                    "{input:?}"
                );
            }
        }
    }

    #[test]
    fn kandidaten_nur_mit_aushandlung() {
        for phase in CallPhase::ALL {
            let p = plan(phase, InputKind::RemoteCandidate);
            let erwartet = matches!(phase, CallPhase::Negotiating | CallPhase::InCall);
            assert_eq!(p.actions.contains(&Action::AddCandidate), erwartet, "{phase}");
        }
    }

    #[test]
    fn anrufer_legt_sitzung_bei_annahme_an() {
        let p = plan(CallPhase::Ringing(Direction::Outgoing), InputKind::CallAccepted);
        assert_eq!(p.next, Some(CallPhase::Negotiating));
        assert_eq!(p.actions, &[Action::StartSession]);

        let p = plan(CallPhase::Negotiating, InputKind::SessionReady);
        assert_eq!(p.actions, &[Action::AdoptSession, Action::ResumePending]);
    }

    #[test]
    fn ablehnung_wartet_auf_grace() {
        let p = plan(CallPhase::Ringing(Direction::Outgoing), InputKind::CallRejected);
        assert_eq!(p.next, None);
        assert!(p.actions.contains(&Action::ScheduleRejectGrace));

        let p = plan(CallPhase::Ringing(Direction::Outgoing), InputKind::GraceElapsed);
        assert_eq!(p.next, Some(CallPhase::Idle));
    }

    #[test]
    fn idle_ignoriert_verspaetete_abschluesse() {
        for input in [
            InputKind::CaptureReady,
            InputKind::SessionReady,
            InputKind::OfferReady,
            InputKind::AnswerReady,
            InputKind::AnswerApplied,
            InputKind::StepFailed,
            InputKind::LocalCandidate,
            InputKind::RemoteCandidate,
            InputKind::SessionOffer,
            InputKind::TransportLost,
        ] {
            assert!(plan(CallPhase::Idle, input).is_ignored(), "{input:?}");
        }
    }
}
