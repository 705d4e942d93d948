//! Theme module for proxy-console
//!
//! Centralized color palette and styling constants shared by the
//! wizard panels and the operation log.

use ratatui::style::Color;
use ratatui::symbols::border::Set;

use crate::session::Severity;

// ============================================================================
// Background Colors
// ============================================================================

/// Primary background color (#0a0e14)
pub const BG_PRIMARY: Color = Color::Rgb(10, 14, 20);

/// Secondary background color for panels (#12161c)
pub const BG_SECONDARY: Color = Color::Rgb(18, 22, 28);

/// Subtle border color (#1e2530)
pub const BORDER_SUBTLE: Color = Color::Rgb(30, 37, 48);

// ============================================================================
// Accent Colors
// ============================================================================

/// Primary cyan accent color (#00d4aa)
pub const CYAN_PRIMARY: Color = Color::Rgb(0, 212, 170);

// ============================================================================
// Status Colors
// ============================================================================

/// Green success color (#4ade80)
pub const GREEN_SUCCESS: Color = Color::Rgb(74, 222, 128);

/// Green active/cursor indicator (#22c55e)
pub const GREEN_ACTIVE: Color = Color::Rgb(34, 197, 94);

/// Amber warning color (#fbbf24)
pub const AMBER_WARNING: Color = Color::Rgb(251, 191, 36);

/// Red error color (#f87171)
pub const RED_ERROR: Color = Color::Rgb(248, 113, 113);

// ============================================================================
// Text Colors
// ============================================================================

/// Primary text color - bright white (#e2e8f0)
pub const TEXT_PRIMARY: Color = Color::Rgb(226, 232, 240);

/// Secondary text color - muted gray (#94a3b8)
pub const TEXT_SECONDARY: Color = Color::Rgb(148, 163, 184);

/// Muted text color - for labels and hints (#64748b)
pub const TEXT_MUTED: Color = Color::Rgb(100, 116, 139);

// ============================================================================
// Border Sets
// ============================================================================

/// Rounded corner border set
///
/// ```text
/// ╭─────╮
/// │xxxxx│
/// ╰─────╯
/// ```
pub const ROUNDED_BORDERS: Set = Set {
    top_left: "╭",
    top_right: "╮",
    bottom_left: "╰",
    bottom_right: "╯",
    vertical_left: "│",
    vertical_right: "│",
    horizontal_top: "─",
    horizontal_bottom: "─",
};

/// Foreground color for a log entry of the given severity.
pub fn severity_color(severity: Severity) -> Color {
    match severity {
        Severity::Info => CYAN_PRIMARY,
        Severity::Success => GREEN_SUCCESS,
        Severity::Warning => AMBER_WARNING,
        Severity::Error => RED_ERROR,
        Severity::Output => TEXT_SECONDARY,
    }
}

// ============================================================================
// Animation Helpers
// ============================================================================

/// Spinner animation frames using Braille characters
pub const SPINNER_FRAMES: [char; 10] = ['⠋', '⠙', '⠹', '⠸', '⠼', '⠴', '⠦', '⠧', '⠇', '⠏'];

/// Returns the current spinner frame based on the animation tick.
pub fn get_spinner_frame(tick: u64) -> char {
    SPINNER_FRAMES[(tick % 10) as usize]
}
