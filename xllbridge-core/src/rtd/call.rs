//! Worksheet side of an RTD function.

use tracing::warn;

use crate::config::RtdConfig;
use crate::host::Host;
use crate::value::Variant;

/// Ask the host for the live value of RTD function `function`.
///
/// The host only forwards strings, so each argument is flattened with
/// [`Variant::topic_text`]. The answer is decoded back into an array when
/// it holds codec text. If the host rejects the call the cell shows
/// `config.call_failure_text`.
pub fn call_rtd(host: &dyn Host, config: &RtdConfig, function: &str, args: &[Variant]) -> Variant {
    let mut topics = Vec::with_capacity(args.len() + 1);
    topics.push(function.to_string());
    topics.extend(args.iter().map(Variant::topic_text));

    match host.call_rtd(&config.prog_id, "", &topics) {
        Ok(raw) => {
            let mut value = Variant::from_raw(&raw, host);
            value.deserialize();
            value
        }
        Err(code) => {
            warn!(function, code, "host rejected RTD call");
            Variant::text(config.call_failure_text.clone())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::host::{CellRef, CoerceTarget, RawValue};
    use parking_lot::Mutex;

    #[derive(Default)]
    struct RecordingHost {
        seen: Mutex<Vec<(String, String, Vec<String>)>>,
        answer: Option<RawValue>,
    }

    impl Host for RecordingHost {
        fn coerce(&self, _reference: &CellRef, _target: CoerceTarget) -> Result<RawValue, i32> {
            Err(32)
        }

        fn caller(&self) -> Option<CellRef> {
            None
        }

        fn call_rtd(&self, prog_id: &str, server: &str, topics: &[String]) -> Result<RawValue, i32> {
            self.seen
                .lock()
                .push((prog_id.to_string(), server.to_string(), topics.to_vec()));
            self.answer.clone().ok_or(32)
        }
    }

    #[test]
    fn arguments_travel_as_codec_text() {
        let host = RecordingHost {
            answer: Some(RawValue::Text("ok".into())),
            ..RecordingHost::default()
        };
        let args = [
            Variant::list(vec![Variant::number(1.0), Variant::text("a,b")]),
            Variant::number(2.5),
        ];
        call_rtd(&host, &RtdConfig::default(), "Quote", &args);

        let seen = host.seen.lock();
        let (prog_id, server, topics) = &seen[0];
        assert_eq!(prog_id, "rtdserver");
        assert_eq!(server, "");
        assert_eq!(topics, &vec!["Quote".to_string(), "1,a\\,b".to_string(), "2.5".to_string()]);
    }

    #[test]
    fn answers_are_decoded() {
        let host = RecordingHost {
            answer: Some(RawValue::Text("10.123123,Ten|20,Twenty".into())),
            ..RecordingHost::default()
        };
        let value = call_rtd(&host, &RtdConfig::default(), "RTDArray", &[]);
        assert_eq!(value.shape(), (2, 2));
        assert_eq!(value.at(2, 2).unwrap().as_text(), "Twenty");
    }

    #[test]
    fn rejected_call_shows_failure_text() {
        let host = RecordingHost::default();
        let value = call_rtd(&host, &RtdConfig::default(), "Quote", &[]);
        assert_eq!(value.as_text(), "RTD service exception");
    }
}
