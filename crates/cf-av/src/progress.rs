//! Parser for ffmpeg `-progress` key/value output.

/// Accumulates `-progress pipe:2` lines and yields a percentage at the end
/// of each progress block.
///
/// Without a known duration only the final `progress=end` block reports
/// (as 100).
#[derive(Debug, Clone)]
pub struct ProgressParser {
    duration_secs: Option<f64>,
    out_time_us: Option<i64>,
    last_pct: f64,
}

impl ProgressParser {
    pub fn new(duration_secs: Option<f64>) -> Self {
        Self {
            duration_secs: duration_secs.filter(|d| d.is_finite() && *d > 0.0),
            out_time_us: None,
            last_pct: 0.0,
        }
    }

    /// Feed one line. Returns a new percentage in `[0, 100]` when a block
    /// ends and the value moved forward.
    pub fn feed(&mut self, line: &str) -> Option<f64> {
        let line = line.trim();
        if let Some(val) = line.strip_prefix("out_time_us=") {
            self.out_time_us = val.parse::<i64>().ok();
            return None;
        }
        let state = line.strip_prefix("progress=")?;

        let pct = if state == "end" {
            100.0
        } else {
            let (out_us, dur) = (self.out_time_us?, self.duration_secs?);
            ((out_us as f64 / 1_000_000.0) / dur * 100.0).clamp(0.0, 100.0)
        };

        if pct > self.last_pct {
            self.last_pct = pct;
            Some(pct)
        } else {
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn feed_all(parser: &mut ProgressParser, text: &str) -> Vec<f64> {
        text.lines().filter_map(|l| parser.feed(l)).collect()
    }

    #[test]
    fn reports_at_block_boundaries() {
        let mut parser = ProgressParser::new(Some(10.0));
        let out = feed_all(
            &mut parser,
            "frame=10\nout_time_us=2500000\nspeed=1.0x\nprogress=continue\n\
             out_time_us=5000000\nprogress=continue\n\
             out_time_us=10000000\nprogress=end\n",
        );
        assert_eq!(out, vec![25.0, 50.0, 100.0]);
    }

    #[test]
    fn never_goes_backwards() {
        let mut parser = ProgressParser::new(Some(8.0));
        let out = feed_all(
            &mut parser,
            "out_time_us=6000000\nprogress=continue\nout_time_us=3000000\nprogress=continue\n",
        );
        assert_eq!(out, vec![75.0]);
    }

    #[test]
    fn unknown_duration_only_reports_end() {
        let mut parser = ProgressParser::new(None);
        let out = feed_all(&mut parser, "out_time_us=1000\nprogress=continue\nprogress=end\n");
        assert_eq!(out, vec![100.0]);
    }

    #[test]
    fn garbage_is_ignored() {
        let mut parser = ProgressParser::new(Some(1.0));
        assert_eq!(parser.feed("out_time_us=N/A"), None);
        assert_eq!(parser.feed("progress=continue"), None);
        assert_eq!(parser.feed("[mp4 @ 0x0] something"), None);
    }
}
