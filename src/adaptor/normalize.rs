use crate::error::RelayError;
use crate::urp::{FinishReason, RelayRequest, Stop};
use serde_json::Value;

/// Smallest `top_p` sent to vendors whose lower bound is exclusive.
pub const MIN_POSITIVE_TOP_P: f64 = 0.01;

/// Upper `top_p` bound for vendors where `1.0` selects a degenerate sampling mode.
pub const TOP_P_BELOW_ONE: f64 = 0.9999;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SamplingPolicy {
    /// `temperature` and `top_p` both in `[0, 1]`.
    UnitInterval,
    /// `top_p` in `(0, 1]`, `temperature` in `[0, 1]`.
    PositiveTopP,
    /// `top_p` in `(0, 0.9999]`, `temperature` untouched.
    TopPBelowOne,
    Passthrough,
}

#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct Sampling {
    pub temperature: Option<f64>,
    pub top_p: Option<f64>,
}

/// Absent values stay absent; only present values are clamped.
pub fn clamp_sampling(req: &RelayRequest, policy: SamplingPolicy) -> Sampling {
    let (temperature, top_p) = match policy {
        SamplingPolicy::UnitInterval => (
            req.temperature.map(clamp_unit),
            req.top_p.map(clamp_unit),
        ),
        SamplingPolicy::PositiveTopP => (
            req.temperature.map(clamp_unit),
            req.top_p.map(clamp_positive_unit),
        ),
        SamplingPolicy::TopPBelowOne => (req.temperature, req.top_p.map(clamp_below_one)),
        SamplingPolicy::Passthrough => (req.temperature, req.top_p),
    };
    Sampling { temperature, top_p }
}

pub fn clamp_unit(v: f64) -> f64 {
    v.clamp(0.0, 1.0)
}

pub fn clamp_positive_unit(v: f64) -> f64 {
    if v <= 0.0 {
        MIN_POSITIVE_TOP_P
    } else {
        v.min(1.0)
    }
}

pub fn clamp_below_one(v: f64) -> f64 {
    if v >= 1.0 {
        TOP_P_BELOW_ONE
    } else if v <= 0.0 {
        MIN_POSITIVE_TOP_P
    } else {
        v
    }
}

/// Parse the wire `stop` field. Scalars inside an array are stringified and
/// nulls skipped; nested arrays or objects are rejected.
pub fn parse_stop(raw: &Value) -> Result<Stop, RelayError> {
    match raw {
        Value::Null => Ok(Stop::Absent),
        Value::String(s) => Ok(Stop::Single(s.clone())),
        Value::Array(items) => {
            let mut out = Vec::with_capacity(items.len());
            for item in items {
                match item {
                    Value::Null => {}
                    Value::String(s) => out.push(s.clone()),
                    Value::Number(n) => out.push(n.to_string()),
                    Value::Bool(b) => out.push(b.to_string()),
                    Value::Array(_) | Value::Object(_) => {
                        return Err(RelayError::InvalidStop(format!(
                            "non-scalar stop element: {item}"
                        )));
                    }
                }
            }
            Ok(Stop::Many(out))
        }
        other => Err(RelayError::InvalidStop(format!(
            "expected string or array, got {other}"
        ))),
    }
}

pub fn normalize_finish_reason(raw: Option<&str>) -> FinishReason {
    match raw {
        Some("length") | Some("max_tokens") => FinishReason::Length,
        _ => FinishReason::Stop,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::urp::{Message, Role};
    use serde_json::json;

    fn request(temperature: Option<f64>, top_p: Option<f64>) -> RelayRequest {
        RelayRequest {
            model: "m".to_string(),
            messages: vec![Message::text(Role::User, "hi")],
            temperature,
            top_p,
            max_tokens: None,
            stop: Stop::Absent,
            stream: false,
        }
    }

    #[test]
    fn positive_top_p_policy_clamps_both_ends() {
        let s = clamp_sampling(&request(Some(-0.5), Some(2.0)), SamplingPolicy::PositiveTopP);
        assert_eq!(s.top_p, Some(1.0));
        assert_eq!(s.temperature, Some(0.0));

        let s = clamp_sampling(&request(Some(0.3), Some(0.0)), SamplingPolicy::PositiveTopP);
        assert_eq!(s.top_p, Some(MIN_POSITIVE_TOP_P));
        assert_eq!(s.temperature, Some(0.3));
    }

    #[test]
    fn unit_interval_policy_clamps_independently() {
        let s = clamp_sampling(&request(Some(1.5), Some(-0.3)), SamplingPolicy::UnitInterval);
        assert_eq!(s.top_p, Some(0.0));
        assert_eq!(s.temperature, Some(1.0));
    }

    #[test]
    fn below_one_policy_never_sends_one() {
        let s = clamp_sampling(&request(Some(1.7), Some(1.5)), SamplingPolicy::TopPBelowOne);
        assert_eq!(s.top_p, Some(TOP_P_BELOW_ONE));
        assert_eq!(s.temperature, Some(1.7));
        let s = clamp_sampling(&request(None, Some(1.0)), SamplingPolicy::TopPBelowOne);
        assert_eq!(s.top_p, Some(TOP_P_BELOW_ONE));
    }

    #[test]
    fn absent_values_are_not_defaulted() {
        for policy in [
            SamplingPolicy::UnitInterval,
            SamplingPolicy::PositiveTopP,
            SamplingPolicy::TopPBelowOne,
            SamplingPolicy::Passthrough,
        ] {
            assert_eq!(clamp_sampling(&request(None, None), policy), Sampling::default());
        }
    }

    #[test]
    fn parse_stop_shapes() {
        assert_eq!(parse_stop(&json!("STOP")).unwrap().sequences(), vec!["STOP"]);
        assert_eq!(
            parse_stop(&json!(["STOP", "END"])).unwrap().sequences(),
            vec!["STOP", "END"]
        );
        assert_eq!(parse_stop(&Value::Null).unwrap(), Stop::Absent);
        assert!(parse_stop(&Value::Null).unwrap().sequences().is_empty());
    }

    #[test]
    fn parse_stop_stringifies_scalars() {
        let stop = parse_stop(&json!(["END", 42, true, null])).unwrap();
        assert_eq!(stop.sequences(), vec!["END", "42", "true"]);
    }

    #[test]
    fn parse_stop_rejects_non_scalars() {
        assert!(matches!(
            parse_stop(&json!(["END", {"a": 1}])),
            Err(RelayError::InvalidStop(_))
        ));
        assert!(matches!(
            parse_stop(&json!([["nested"]])),
            Err(RelayError::InvalidStop(_))
        ));
        assert!(matches!(parse_stop(&json!(7)), Err(RelayError::InvalidStop(_))));
    }

    #[test]
    fn finish_reasons_collapse_to_stop_or_length() {
        assert_eq!(normalize_finish_reason(Some("stop")), FinishReason::Stop);
        assert_eq!(normalize_finish_reason(Some("end_turn")), FinishReason::Stop);
        assert_eq!(normalize_finish_reason(Some("length")), FinishReason::Length);
        assert_eq!(normalize_finish_reason(Some("max_tokens")), FinishReason::Length);
        assert_eq!(normalize_finish_reason(Some("tool_calls")), FinishReason::Stop);
        assert_eq!(normalize_finish_reason(Some("sensitive")), FinishReason::Stop);
        assert_eq!(normalize_finish_reason(None), FinishReason::Stop);
    }
}
