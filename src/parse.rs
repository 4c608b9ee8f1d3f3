// 该文件是 Zhanpai （站牌播报） 项目的一部分。
// src/parse.rs - 从识别文字中提取线路号
//
// 本文件根据 Apache 许可证第 2.0 版（以下简称“许可证”）授权使用；
// 除非遵守该许可证条款，否则您不得使用本文件。
// 您可通过以下网址获取许可证副本：
// http://www.apache.org/licenses/LICENSE-2.0
// 除非适用法律要求或书面同意，根据本许可协议分发的软件均按“原样”提供，
// 不附带任何形式的明示或暗示的保证或条件。
// 有关许可权限与限制的具体条款，请参阅本许可协议。
//
// Copyright (C) 2026 Johann Li <me@qinka.pro>, Wareless Group

use std::sync::LazyLock;

use regex::Regex;
use tracing::debug;

// 按顺序尝试，先匹配者优先。数字位数在正则层面限制为 1-4 位，
// 前后紧邻其他数字的匹配在 `parse_number` 中排除。
static PATTERNS: LazyLock<[Regex; 3]> = LazyLock::new(|| {
  [
    // 数字 + 单位词: "146번", "7 호선"
    Regex::new(r"([0-9]{1,4})\s*(?:번|호선|라인|버스)").expect("内置正则无效"),
    // 单位词 + 数字: "번호 146", "버스 9201"
    Regex::new(r"(?:번호|버스)\s*([0-9]{1,4})").expect("内置正则无效"),
    // 独立的数字词
    Regex::new(r"\b([0-9]{1,4})\b").expect("内置正则无效"),
  ]
});

/// 去掉千位分隔符（半角、全角逗号）并合并空白
pub fn clean_text(text: &str) -> String {
  text
    .replace([',', '，'], "")
    .split_whitespace()
    .collect::<Vec<_>>()
    .join(" ")
}

// 匹配不消耗前后的字符，所以相邻的线路号（"0번2번"）都能被看到
fn stands_alone(text: &str, start: usize, end: usize) -> bool {
  let before = text[..start].chars().next_back();
  let after = text[end..].chars().next();
  !before.is_some_and(|c| c.is_ascii_digit()) && !after.is_some_and(|c| c.is_ascii_digit())
}

fn is_valid_number(digits: &str) -> bool {
  (1..=4).contains(&digits.len())
    && digits
      .parse::<u16>()
      .map(|n| (1..=9999).contains(&n))
      .unwrap_or(false)
}

/// 提取 1-9999 范围内的线路号，找不到时返回 `None`
pub fn parse_number(text: &str) -> Option<String> {
  let cleaned = clean_text(text);
  if cleaned.is_empty() {
    return None;
  }

  for pattern in PATTERNS.iter() {
    for captures in pattern.captures_iter(&cleaned) {
      let Some(digits) = captures.get(1) else {
        continue;
      };
      if !stands_alone(&cleaned, digits.start(), digits.end()) {
        continue;
      }
      let digits = digits.as_str();
      if is_valid_number(digits) {
        debug!("提取线路号: {} (文字: {})", digits, cleaned);
        return Some(digits.to_string());
      }
    }
  }

  debug!("未找到有效线路号: {}", cleaned);
  None
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn number_with_suffix() {
    assert_eq!(parse_number("146번"), Some("146".to_string()));
    assert_eq!(parse_number("간선 472 번 버스"), Some("472".to_string()));
    assert_eq!(parse_number("2호선"), Some("2".to_string()));
  }

  #[test]
  fn suffix_beats_bare_number() {
    assert_eq!(parse_number("12 정류장 3번"), Some("3".to_string()));
  }

  #[test]
  fn prefix_token() {
    assert_eq!(parse_number("번호 721"), Some("721".to_string()));
    assert_eq!(parse_number("버스7016"), Some("7016".to_string()));
  }

  #[test]
  fn thousands_separator_is_removed() {
    assert_eq!(parse_number("9,201"), Some("9201".to_string()));
    assert_eq!(parse_number("9，201번"), Some("9201".to_string()));
  }

  #[test]
  fn no_digits() {
    assert_eq!(parse_number("no numbers here"), None);
    assert_eq!(parse_number(""), None);
    assert_eq!(parse_number("   "), None);
  }

  #[test]
  fn five_digits_are_rejected() {
    assert_eq!(parse_number("99999"), None);
    assert_eq!(parse_number("12345번"), None);
    assert_eq!(parse_number("번호 12345"), None);
  }

  #[test]
  fn zero_is_not_a_route() {
    assert_eq!(parse_number("0번"), None);
    assert_eq!(parse_number("0000"), None);
    assert_eq!(parse_number("0번 또는 15번"), Some("15".to_string()));
  }

  #[test]
  fn adjacent_numbers_are_both_seen() {
    assert_eq!(parse_number("0번2번"), Some("2".to_string()));
    assert_eq!(parse_number("0번2호선"), Some("2".to_string()));
    assert_eq!(parse_number("버스0버스15"), Some("15".to_string()));
  }

  #[test]
  fn digits_inside_longer_run_are_rejected() {
    assert_eq!(parse_number("a12345번"), None);
    assert_eq!(parse_number("버스 12345 정류장"), None);
  }

  #[test]
  fn whitespace_is_collapsed() {
    assert_eq!(clean_text("  1,234 \n  번\t"), "1234 번");
    assert_eq!(parse_number("  1,234 \n  번\t"), Some("1234".to_string()));
  }
}
