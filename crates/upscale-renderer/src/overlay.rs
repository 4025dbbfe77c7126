//! Debug overlay state.
//!
//! Holds what the on-screen controls show and edit: the technique, target
//! and internal resolution lists, the delta amplifier and the latest GPU
//! timings. Input is mapped to [`OverlayAction`]s by the window layer;
//! resolution changes only move the selection ordinals and are applied by
//! the frame loop.

use std::time::{Duration, Instant};

use upscale_common::config::{clamp_delta_amplifier, MAX_DELTA_AMPLIFIER, MIN_DELTA_AMPLIFIER};
use upscale_common::{ResolutionSelection, SelectionError, UpscaleTechnique};

use crate::vulkan::timestamps::{TimerSummary, TimerTag};

/// Step applied by the amplifier increase/decrease actions.
pub const DELTA_AMPLIFIER_STEP: f32 = 1.0;

/// How often resolved GPU timings are logged.
pub const TIMER_LOG_INTERVAL: Duration = Duration::from_secs(1);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OverlayAction {
    NextTechnique,
    NextTarget,
    NextInternal,
    IncreaseAmplifier,
    DecreaseAmplifier,
}

/// One combo box: its entries and the highlighted one.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ComboState {
    pub label: &'static str,
    pub entries: Vec<&'static str>,
    pub selected: usize,
}

impl ComboState {
    fn render(&self) -> String {
        let items: Vec<String> = self.entries
            .iter()
            .enumerate()
            .map(|(i, e)| if i == self.selected { format!("[{}]", e) } else { e.to_string() })
            .collect();
        format!("{}: {}", self.label, items.join(" "))
    }
}

pub struct DebugOverlay {
    delta_amplifier: f32,
    timers: Option<TimerSummary>,
    last_timer_log: Option<Instant>,
}

impl DebugOverlay {
    pub fn new(delta_amplifier: f32) -> Self {
        Self {
            delta_amplifier: clamp_delta_amplifier(delta_amplifier),
            timers: None,
            last_timer_log: None,
        }
    }

    pub fn delta_amplifier(&self) -> f32 {
        self.delta_amplifier
    }

    pub fn timers(&self) -> Option<TimerSummary> {
        self.timers
    }

    /// Apply one input action. Returns whether anything changed.
    pub fn apply(
        &mut self,
        action: OverlayAction,
        selection: &mut ResolutionSelection,
    ) -> Result<bool, SelectionError> {
        match action {
            OverlayAction::NextTechnique => {
                let len = UpscaleTechnique::names().len();
                selection.select_technique_index((selection.technique().index() + 1) % len)?;
                Ok(true)
            }
            OverlayAction::NextTarget => {
                let len = selection.target_resolution_texts().len();
                if len < 2 {
                    return Ok(false);
                }
                selection.select_target_index((selection.target_index() + 1) % len)?;
                Ok(true)
            }
            OverlayAction::NextInternal => {
                let len = selection.internal_resolution_texts().len();
                if len < 2 {
                    return Ok(false);
                }
                selection.select_internal_index((selection.internal_index() + 1) % len)?;
                Ok(true)
            }
            OverlayAction::IncreaseAmplifier => Ok(self.set_delta_amplifier(self.delta_amplifier + DELTA_AMPLIFIER_STEP)),
            OverlayAction::DecreaseAmplifier => Ok(self.set_delta_amplifier(self.delta_amplifier - DELTA_AMPLIFIER_STEP)),
        }
    }

    fn set_delta_amplifier(&mut self, value: f32) -> bool {
        let clamped = clamp_delta_amplifier(value);
        let changed = clamped != self.delta_amplifier;
        self.delta_amplifier = clamped;
        changed
    }

    /// Record the newest timings; returns them when a log line is due.
    pub fn update_timers(&mut self, summary: Option<TimerSummary>, now: Instant) -> Option<TimerSummary> {
        let summary = summary?;
        self.timers = Some(summary);
        let due = self.last_timer_log
            .map_or(true, |last| now.duration_since(last) >= TIMER_LOG_INTERVAL);
        if due {
            self.last_timer_log = Some(now);
            Some(summary)
        } else {
            None
        }
    }

    pub fn combos(&self, selection: &ResolutionSelection) -> [ComboState; 3] {
        [
            ComboState {
                label: "Upscale",
                entries: UpscaleTechnique::names(),
                selected: selection.technique().index(),
            },
            ComboState {
                label: "Target",
                entries: selection.target_resolution_texts(),
                selected: selection.target_index(),
            },
            ComboState {
                label: "Internal",
                entries: selection.internal_resolution_texts(),
                selected: selection.internal_display_index(),
            },
        ]
    }

    /// Full overlay text, one control per line.
    pub fn lines(&self, selection: &ResolutionSelection) -> Vec<String> {
        let mut lines: Vec<String> = self.combos(selection).iter().map(ComboState::render).collect();
        lines.push(format!(
            "Delta amplifier: {:.0} ({:.0}..{:.0})",
            self.delta_amplifier, MIN_DELTA_AMPLIFIER, MAX_DELTA_AMPLIFIER
        ));
        match &self.timers {
            Some(summary) => lines.extend(
                TimerTag::ALL.iter().map(|tag| format!("{}: {:.3} ms", tag.label(), summary.get(*tag))),
            ),
            None => lines.push("GPU timings pending".to_string()),
        }
        lines
    }

    /// Compact status for the window title.
    pub fn title(&self, selection: &ResolutionSelection) -> String {
        let mut title = format!(
            "Upscale Demo - {} | {} -> {} -> {} | delta x{:.0}",
            selection.technique(),
            selection.internal_text(),
            selection.target_text(),
            selection.present_text(),
            self.delta_amplifier
        );
        if let Some(summary) = &self.timers {
            title.push_str(&format!(" | total {:.2} ms", summary.get(TimerTag::TotalInternal)));
        }
        title
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use upscale_common::{PresentResolutionKey, UpscaleTechnique};

    fn selection() -> ResolutionSelection {
        ResolutionSelection::new(PresentResolutionKey::P2160p, UpscaleTechnique::None)
    }

    #[test]
    fn test_technique_cycles_through_all() {
        let mut overlay = DebugOverlay::new(4.0);
        let mut sel = selection();
        for expected in [UpscaleTechnique::Cas, UpscaleTechnique::Checkerboard, UpscaleTechnique::None] {
            assert!(overlay.apply(OverlayAction::NextTechnique, &mut sel).unwrap());
            assert_eq!(sel.technique(), expected);
        }
    }

    #[test]
    fn test_target_change_waits_for_update() {
        let mut overlay = DebugOverlay::new(4.0);
        let mut sel = selection();
        let before = sel.target();
        assert!(overlay.apply(OverlayAction::NextTarget, &mut sel).unwrap());
        assert_eq!(sel.target_index(), 1);
        assert_eq!(sel.target(), before);
        assert!(sel.update_target_resolution());
        assert_ne!(sel.target(), before);
    }

    #[test]
    fn test_internal_cycle_wraps() {
        let mut overlay = DebugOverlay::new(4.0);
        let mut sel = selection();
        let len = sel.internal_resolution_texts().len();
        for _ in 0..len {
            overlay.apply(OverlayAction::NextInternal, &mut sel).unwrap();
        }
        assert_eq!(sel.internal_index(), 0);
    }

    #[test]
    fn test_internal_fixed_for_checkerboard() {
        let mut overlay = DebugOverlay::new(4.0);
        let mut sel = selection();
        sel.select_technique(UpscaleTechnique::Checkerboard);
        assert!(!overlay.apply(OverlayAction::NextInternal, &mut sel).unwrap());
        assert_eq!(sel.internal_index(), 0);
    }

    #[test]
    fn test_amplifier_clamped() {
        let mut overlay = DebugOverlay::new(MAX_DELTA_AMPLIFIER);
        let mut sel = selection();
        assert!(!overlay.apply(OverlayAction::IncreaseAmplifier, &mut sel).unwrap());
        assert_eq!(overlay.delta_amplifier(), MAX_DELTA_AMPLIFIER);

        let mut overlay = DebugOverlay::new(MIN_DELTA_AMPLIFIER + 1.0);
        assert!(overlay.apply(OverlayAction::DecreaseAmplifier, &mut sel).unwrap());
        assert!(!overlay.apply(OverlayAction::DecreaseAmplifier, &mut sel).unwrap());
        assert_eq!(overlay.delta_amplifier(), MIN_DELTA_AMPLIFIER);

        assert_eq!(DebugOverlay::new(100.0).delta_amplifier(), MAX_DELTA_AMPLIFIER);
    }

    #[test]
    fn test_timer_log_throttled() {
        let mut overlay = DebugOverlay::new(4.0);
        let start = Instant::now();
        let summary = TimerSummary { ms: [4.0, 2.0, 1.0, 3.0] };

        assert_eq!(overlay.update_timers(None, start), None);
        assert_eq!(overlay.update_timers(Some(summary), start), Some(summary));
        assert_eq!(overlay.update_timers(Some(summary), start + Duration::from_millis(500)), None);
        assert_eq!(overlay.timers(), Some(summary));
        assert_eq!(overlay.update_timers(Some(summary), start + Duration::from_millis(1000)), Some(summary));
    }

    #[test]
    fn test_lines_mark_selection() {
        let overlay = DebugOverlay::new(4.0);
        let mut sel = selection();
        sel.select_technique(UpscaleTechnique::Cas);
        let lines = overlay.lines(&sel);
        assert_eq!(lines[0], "Upscale: None [CAS] Checkerboard");
        assert!(lines[1].starts_with("Target: ["));
        assert!(lines.iter().any(|l| l == "GPU timings pending"));
    }

    #[test]
    fn test_title_names_chain() {
        let overlay = DebugOverlay::new(8.0);
        let sel = selection();
        let title = overlay.title(&sel);
        assert!(title.contains(sel.present_text()));
        assert!(title.contains(sel.target_text()));
        assert!(title.contains("x8"));
    }
}
