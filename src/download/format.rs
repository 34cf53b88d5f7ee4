//! 章节号编码格式探测。
//!
//! 未确定格式时按候选顺序逐个尝试；某部漫画第一次探测成功后，格式即被锁定，
//! 之后只返回这一种编码。锁定只发生一次，后续记录一律忽略。

use std::collections::HashMap;
use std::sync::RwLock;

use tracing::info;

use super::models::{ChapterFormat, Series};

/// 从一次成功的编码字符串推断补零宽度。
pub trait WidthInference: Send + Sync {
    fn infer(&self, encoding: &str) -> ChapterFormat;
}

/// 按字符数推断：1 位 → 不补零，2 位 → 两位，其余 → 三位。
///
/// 在位数变化处会误判（第 9 章以 "9" 成功后锁定为不补零，第 10 章只会尝试 "10"）。
#[derive(Debug, Default, Clone, Copy)]
pub struct DigitCountInference;

impl WidthInference for DigitCountInference {
    fn infer(&self, encoding: &str) -> ChapterFormat {
        match encoding.chars().count() {
            0 | 1 => ChapterFormat::Unpadded,
            2 => ChapterFormat::TwoDigits,
            _ => ChapterFormat::ThreeDigits,
        }
    }
}

pub struct FormatDetector {
    detected: RwLock<HashMap<String, ChapterFormat>>,
    inference: Box<dyn WidthInference>,
}

impl Default for FormatDetector {
    fn default() -> Self {
        Self::new(Box::new(DigitCountInference))
    }
}

impl FormatDetector {
    pub fn new(inference: Box<dyn WidthInference>) -> Self {
        Self {
            detected: RwLock::new(HashMap::new()),
            inference,
        }
    }

    pub fn detected(&self, series: &str) -> Option<ChapterFormat> {
        let map = self.detected.read().unwrap_or_else(|e| e.into_inner());
        map.get(series).copied()
    }

    /// 返回本章要尝试的编码，按优先级排列且去重。
    pub fn candidate_encodings(&self, series: &Series, chapter: u32) -> Vec<String> {
        if let Some(fmt) = self.detected(&series.name) {
            return vec![fmt.encode(chapter)];
        }

        let order = series
            .hint
            .into_iter()
            .chain(ChapterFormat::PROBE_ORDER)
            .map(|fmt| fmt.encode(chapter));

        let mut out: Vec<String> = Vec::with_capacity(4);
        for enc in order {
            if !out.contains(&enc) {
                out.push(enc);
            }
        }
        out
    }

    /// 记录首次成功的编码；已锁定时不做任何改动。返回本次是否写入。
    pub fn record_detected(&self, series: &str, encoding: &str) -> bool {
        let mut map = self.detected.write().unwrap_or_else(|e| e.into_inner());
        if map.contains_key(series) {
            return false;
        }
        let fmt = self.inference.infer(encoding);
        map.insert(series.to_string(), fmt);
        info!(target: "format", series, pattern = %fmt, "检测到章节编码格式 {fmt}");
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn undetected_series_tries_widest_first() {
        let det = FormatDetector::default();
        let series = Series::new("Foo", None);
        assert_eq!(det.candidate_encodings(&series, 7), ["007", "07", "7"]);
        assert_eq!(det.candidate_encodings(&series, 42), ["042", "42"]);
        assert_eq!(det.candidate_encodings(&series, 123), ["123"]);
    }

    #[test]
    fn declared_format_goes_first() {
        let det = FormatDetector::default();
        let series = Series::new("Foo", Some(ChapterFormat::Unpadded));
        assert_eq!(det.candidate_encodings(&series, 7), ["7", "007", "07"]);
    }

    #[test]
    fn first_detection_wins_and_is_sticky() {
        let det = FormatDetector::default();
        assert!(det.record_detected("Foo", "07"));
        assert!(!det.record_detected("Foo", "007"));
        assert_eq!(det.detected("Foo"), Some(ChapterFormat::TwoDigits));

        // 声明格式与检测结果不同也以检测结果为准
        let hinted = Series::new("Foo", Some(ChapterFormat::ThreeDigits));
        for _ in 0..3 {
            assert_eq!(det.candidate_encodings(&hinted, 5), ["05"]);
        }
        assert_eq!(det.candidate_encodings(&hinted, 150), ["150"]);
    }

    #[test]
    fn detection_is_per_series() {
        let det = FormatDetector::default();
        det.record_detected("Foo", "1");
        assert_eq!(det.detected("Foo"), Some(ChapterFormat::Unpadded));
        assert_eq!(det.detected("Bar"), None);
        assert_eq!(
            det.candidate_encodings(&Series::new("Bar", None), 1),
            ["001", "01", "1"]
        );
    }

    #[test]
    fn inference_strategy_is_replaceable() {
        struct AlwaysThree;
        impl WidthInference for AlwaysThree {
            fn infer(&self, _encoding: &str) -> ChapterFormat {
                ChapterFormat::ThreeDigits
            }
        }

        let det = FormatDetector::new(Box::new(AlwaysThree));
        det.record_detected("Foo", "9");
        assert_eq!(
            det.candidate_encodings(&Series::new("Foo", None), 10),
            ["010"]
        );
    }

    #[test]
    fn concurrent_records_keep_a_single_winner() {
        let det = std::sync::Arc::new(FormatDetector::default());
        let handles: Vec<_> = ["1", "01", "001", "01"]
            .into_iter()
            .map(|enc| {
                let det = det.clone();
                std::thread::spawn(move || det.record_detected("Foo", enc))
            })
            .collect();
        let winners = handles
            .into_iter()
            .map(|h| h.join().unwrap())
            .filter(|won| *won)
            .count();
        assert_eq!(winners, 1);
        assert!(det.detected("Foo").is_some());
    }
}
