//! Host-side builtin tools.
//!
//! Builtins are referenced by name in an agent's `builtin_tool_names` and
//! run entirely on the host — they never enter the isolate. Like sandboxed
//! tools, their failures are result strings, not errors.

use serde::Deserialize;

/// Length of one sleep cycle.
const CYCLE_MINUTES: u32 = 90;

/// Average time to fall asleep, added before the first cycle.
const FALL_ASLEEP_MINUTES: u32 = 15;

/// Whether `name` is a builtin this platform ships.
#[must_use]
pub fn is_builtin(name: &str) -> bool {
    matches!(name, "sleep_calculator" | "current_time")
}

/// Run builtin `name` with parsed JSON arguments.
#[must_use]
pub fn run_builtin(name: &str, args: &serde_json::Value) -> String {
    match name {
        "sleep_calculator" => sleep_calculator(args),
        "current_time" => current_time(),
        _ => format!("Unknown tool \"{name}\""),
    }
}

#[derive(Debug, Deserialize)]
struct SleepArgs {
    wake_hour: u32,
    #[serde(default)]
    wake_minute: u32,
    #[serde(default = "default_cycles")]
    cycles: u32,
}

const fn default_cycles() -> u32 {
    5
}

/// Work backwards from a wake-up time in whole sleep cycles.
fn sleep_calculator(args: &serde_json::Value) -> String {
    let args: SleepArgs = match serde_json::from_value(args.clone()) {
        Ok(a) => a,
        Err(e) => return format!("Error: invalid sleep_calculator arguments: {e}"),
    };
    if args.wake_hour > 23 || args.wake_minute > 59 {
        return format!(
            "Error: invalid wake time {:02}:{:02}",
            args.wake_hour, args.wake_minute
        );
    }

    let cycles = args.cycles.clamp(1, 8);
    let sleep_minutes = cycles * CYCLE_MINUTES;
    let total_minutes = sleep_minutes + FALL_ASLEEP_MINUTES;

    // total_minutes is at most 8 cycles + 15 min, well under a day.
    let wake = args.wake_hour * 60 + args.wake_minute;
    let day = 24 * 60;
    let bedtime = (wake + day - total_minutes) % day;

    let sleep_hours = f64::from(sleep_minutes) / 60.0;
    serde_json::json!({
        "bedtime": format!("{:02}:{:02}", bedtime / 60, bedtime % 60),
        "sleep_hours": sleep_hours,
        "cycles": cycles,
    })
    .to_string()
}

fn current_time() -> String {
    chrono::Utc::now().to_rfc3339_opts(chrono::SecondsFormat::Secs, true)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn run_sleep(wake_hour: u32, wake_minute: u32, cycles: u32) -> serde_json::Value {
        let out = run_builtin(
            "sleep_calculator",
            &serde_json::json!({
                "wake_hour": wake_hour,
                "wake_minute": wake_minute,
                "cycles": cycles,
            }),
        );
        serde_json::from_str(&out).unwrap()
    }

    #[test]
    fn five_cycles_before_seven_am() {
        let out = run_sleep(7, 0, 5);
        assert_eq!(out["bedtime"], "23:15");
        assert_eq!(out["sleep_hours"], 7.5);
        assert_eq!(out["cycles"], 5);
    }

    #[test]
    fn six_cycles_before_five_thirty() {
        let out = run_sleep(5, 30, 6);
        assert_eq!(out["bedtime"], "20:15");
        assert_eq!(out["sleep_hours"], 9.0);
    }

    #[test]
    fn cycles_clamp_to_one_through_eight() {
        assert_eq!(run_sleep(7, 0, 0)["cycles"], 1);
        assert_eq!(run_sleep(7, 0, 99)["cycles"], 8);
    }

    #[test]
    fn invalid_wake_time_is_an_error_string() {
        let out = run_builtin("sleep_calculator", &serde_json::json!({"wake_hour": 25}));
        assert!(out.starts_with("Error: invalid wake time"));
    }

    #[test]
    fn current_time_is_iso8601_utc() {
        let out = run_builtin("current_time", &serde_json::Value::Null);
        assert!(out.ends_with('Z'));
        assert!(out.contains('T'));
    }

    #[test]
    fn builtin_registry_is_closed() {
        assert!(is_builtin("sleep_calculator"));
        assert!(is_builtin("current_time"));
        assert!(!is_builtin("get_weather"));
    }
}
