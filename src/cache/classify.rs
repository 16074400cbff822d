//! Response classification.

use super::response::CachedResponse;
use crate::types::FinishReason;

/// Cacheability of a completed response.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResponseClass {
    /// Clean answer: cache immediately.
    Successful,
    /// Usable text but suspicious (filtered, `other` finish, or warnings):
    /// jail until seen often enough.
    Problematic,
    /// No text or an error finish: never cached, never jailed.
    ErrorOnly,
}

impl ResponseClass {
    pub fn as_str(&self) -> &'static str {
        match self {
            ResponseClass::Successful => "successful",
            ResponseClass::Problematic => "problematic",
            ResponseClass::ErrorOnly => "error",
        }
    }
}

/// Classify a response. Pure and total.
pub fn classify(response: &CachedResponse) -> ResponseClass {
    if response.text.is_empty() || response.finish_reason == FinishReason::Error {
        return ResponseClass::ErrorOnly;
    }
    let suspicious_finish = matches!(
        response.finish_reason,
        FinishReason::Other | FinishReason::ContentFilter
    );
    if suspicious_finish || !response.warnings.is_empty() {
        ResponseClass::Problematic
    } else {
        ResponseClass::Successful
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::CallWarning;

    fn response(text: &str, finish_reason: FinishReason, warned: bool) -> CachedResponse {
        CachedResponse {
            text: text.into(),
            finish_reason,
            warnings: if warned {
                vec![CallWarning::other("w")]
            } else {
                Vec::new()
            },
            ..CachedResponse::default()
        }
    }

    const ALL_REASONS: [FinishReason; 7] = [
        FinishReason::Stop,
        FinishReason::Length,
        FinishReason::ContentFilter,
        FinishReason::ToolCalls,
        FinishReason::Error,
        FinishReason::Other,
        FinishReason::Unknown,
    ];

    #[test]
    fn clean_stop_is_successful() {
        assert_eq!(
            classify(&response("hi", FinishReason::Stop, false)),
            ResponseClass::Successful
        );
        assert_eq!(
            classify(&response("hi", FinishReason::Length, false)),
            ResponseClass::Successful
        );
    }

    #[test]
    fn filtered_or_other_is_problematic() {
        assert_eq!(
            classify(&response("hi", FinishReason::ContentFilter, false)),
            ResponseClass::Problematic
        );
        assert_eq!(
            classify(&response("hi", FinishReason::Other, false)),
            ResponseClass::Problematic
        );
    }

    #[test]
    fn warnings_make_a_stop_problematic() {
        assert_eq!(
            classify(&response("hi", FinishReason::Stop, true)),
            ResponseClass::Problematic
        );
    }

    #[test]
    fn error_finish_is_always_error_only() {
        for warned in [false, true] {
            for text in ["", "hi"] {
                assert_eq!(
                    classify(&response(text, FinishReason::Error, warned)),
                    ResponseClass::ErrorOnly
                );
            }
        }
    }

    #[test]
    fn empty_text_is_error_only() {
        for reason in ALL_REASONS {
            assert_eq!(
                classify(&response("", reason, false)),
                ResponseClass::ErrorOnly
            );
        }
    }

    #[test]
    fn classes_partition_the_space() {
        for reason in ALL_REASONS {
            for warned in [false, true] {
                for text in ["", "x"] {
                    let r = response(text, reason, warned);
                    let successful = !r.text.is_empty()
                        && !matches!(
                            reason,
                            FinishReason::Error | FinishReason::Other | FinishReason::ContentFilter
                        )
                        && r.warnings.is_empty();
                    let problematic = !r.text.is_empty()
                        && reason != FinishReason::Error
                        && (matches!(reason, FinishReason::Other | FinishReason::ContentFilter)
                            || !r.warnings.is_empty());
                    assert!(!(successful && problematic));
                    let expected = if successful {
                        ResponseClass::Successful
                    } else if problematic {
                        ResponseClass::Problematic
                    } else {
                        ResponseClass::ErrorOnly
                    };
                    assert_eq!(classify(&r), expected, "{reason} warned={warned} text={text:?}");
                }
            }
        }
    }
}
