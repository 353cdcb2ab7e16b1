// Reminder template selection and rendering
//
// Selection is a strict priority chain; conditions overlap, so the order
// below is what decides which message a user gets.

use crate::core::types::ScheduledReminderSlot;

/// Everything a template can refer to when picking or filling a message
#[derive(Debug, Clone, Default)]
pub struct ReminderContext {
    pub name: String,
    /// Suggested ounces for the due slot
    pub ounces: f64,
    /// Slot time as written in the plan, e.g. "2:30 PM"
    pub time_label: String,
    pub checkins_today: u32,
    /// `None` when the user has never logged a drink
    pub hours_since_last_drink: Option<f64>,
    pub current_streak: u32,
    pub goal_percent: u32,
    pub behind_schedule: bool,
}

impl ReminderContext {
    fn idle_hours(&self) -> f64 {
        self.hours_since_last_drink.unwrap_or(f64::INFINITY)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TemplateKind {
    Roast24h,
    Roast12h,
    Roast8h,
    Roast6h,
    BehindSchedule12h,
    BehindSchedule8h,
    Streak7,
    Streak3,
    AiCheckin6h,
    AiCheckin4h,
    DailySplash8h,
    DailySplash6h,
    DailySplash,
}

impl TemplateKind {
    /// Template row name in the store
    pub fn name(&self) -> &'static str {
        match self {
            Self::Roast24h => "roast_24h",
            Self::Roast12h => "roast_12h",
            Self::Roast8h => "roast_8h",
            Self::Roast6h => "roast_6h",
            Self::BehindSchedule12h => "behind_schedule_12h",
            Self::BehindSchedule8h => "behind_schedule_8h",
            Self::Streak7 => "streak_7",
            Self::Streak3 => "streak_3",
            Self::AiCheckin6h => "ai_checkin_6h",
            Self::AiCheckin4h => "ai_checkin_4h",
            Self::DailySplash8h => "daily_splash_8h",
            Self::DailySplash6h => "daily_splash_6h",
            Self::DailySplash => "daily_splash",
        }
    }

    pub fn fallback_title(&self) -> &'static str {
        match self {
            Self::Roast24h | Self::Roast12h | Self::Roast8h | Self::Roast6h => "Hello? Anyone thirsty?",
            Self::BehindSchedule12h | Self::BehindSchedule8h => "Let's catch up",
            Self::Streak7 | Self::Streak3 => "Keep the streak alive",
            Self::AiCheckin6h | Self::AiCheckin4h => "Quick check-in",
            Self::DailySplash8h | Self::DailySplash6h | Self::DailySplash => "Time to hydrate",
        }
    }

    /// Body used when the template row is missing or inactive
    fn fallback_line(&self) -> &'static str {
        match self {
            Self::Roast24h => "{name}, it's been a whole day without a drink. Your plants get more water than you.",
            Self::Roast12h => "{name}, {hours} hours and not a sip. Grab {ounces} oz now.",
            Self::Roast8h => "{name}, {hours} hours dry. Your water bottle misses you.",
            Self::Roast6h => "{name}, nothing logged yet today. Start with {ounces} oz.",
            Self::BehindSchedule12h => "{name}, you're at {goal_percent}% of your goal and it's been {hours} hours. Time for {ounces} oz.",
            Self::BehindSchedule8h => "{name}, you're a bit behind today. {ounces} oz gets you back on track.",
            Self::Streak7 => "{streak} days strong, {name}! Keep it going with {ounces} oz.",
            Self::Streak3 => "{streak}-day streak, {name}. Don't break it now: {ounces} oz.",
            Self::AiCheckin6h => "Great work today, {name}. It's been {hours} hours though. Top up with {ounces} oz?",
            Self::AiCheckin4h => "Nice pace, {name}. {ounces} oz keeps it going.",
            Self::DailySplash8h => "{name}, {hours} hours since your last drink. {ounces} oz please.",
            Self::DailySplash6h => "{name}, it's been a while. Have {ounces} oz.",
            Self::DailySplash => "It's {time}, {name}. Time for {ounces} oz of water.",
        }
    }
}

/// Pick the template for a due slot
pub fn select_template(ctx: &ReminderContext) -> TemplateKind {
    let hours = ctx.idle_hours();

    if ctx.checkins_today == 0 {
        if hours >= 24.0 {
            return TemplateKind::Roast24h;
        }
        if hours >= 12.0 {
            return TemplateKind::Roast12h;
        }
        if hours >= 8.0 {
            return TemplateKind::Roast8h;
        }
        if hours >= 6.0 {
            return TemplateKind::Roast6h;
        }
    }

    if ctx.checkins_today > 0 && ctx.behind_schedule {
        if hours >= 12.0 {
            return TemplateKind::BehindSchedule12h;
        }
        if hours >= 8.0 {
            return TemplateKind::BehindSchedule8h;
        }
    }

    if ctx.current_streak >= 7 {
        return TemplateKind::Streak7;
    }
    if ctx.current_streak >= 3 {
        return TemplateKind::Streak3;
    }

    if ctx.checkins_today >= 5 {
        if hours >= 6.0 {
            return TemplateKind::AiCheckin6h;
        }
        if hours >= 4.0 {
            return TemplateKind::AiCheckin4h;
        }
    }

    if hours > 8.0 {
        return TemplateKind::DailySplash8h;
    }
    if hours > 6.0 {
        return TemplateKind::DailySplash6h;
    }
    TemplateKind::DailySplash
}

/// Format ounces without a trailing ".0"
pub fn format_ounces(ounces: f64) -> String {
    if ounces.fract() == 0.0 {
        format!("{:.0}", ounces)
    } else {
        format!("{:.1}", ounces)
    }
}

/// Substitute placeholders in a template body or title
pub fn render(body: &str, ctx: &ReminderContext) -> String {
    let hours = match ctx.hours_since_last_drink {
        Some(h) => format!("{}", h.floor() as i64),
        None => "24+".to_string(),
    };

    body.replace("{name}", &ctx.name)
        .replace("{ounces}", &format_ounces(ctx.ounces))
        .replace("{time}", &ctx.time_label)
        .replace("{hours}", &hours)
        .replace("{streak}", &ctx.current_streak.to_string())
        .replace("{goal_percent}", &ctx.goal_percent.to_string())
}

/// Message body when no usable template row exists. The slot's own note
/// takes precedence over the built-in line.
pub fn fallback_message(kind: TemplateKind, ctx: &ReminderContext, slot: &ScheduledReminderSlot) -> String {
    let note = slot.note.trim();
    if note.is_empty() {
        render(kind.fallback_line(), ctx)
    } else {
        format!("{} ({} oz)", render(note, ctx), format_ounces(ctx.ounces))
    }
}
