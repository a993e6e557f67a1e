//! キーワード規則エンジン
//!
//! 1件の入力テキストと1件の規則を評価する純粋関数。
//! 判定はすべて大文字小文字を区別する部分文字列検索で、前後の空白を除いたテキストに対して行う。

use crate::types::CategoryRule;

/// 空でないキーワードのみを対象にする
fn non_empty<'a>(keywords: &'a [String]) -> impl Iterator<Item = &'a str> + 'a {
    keywords.iter().map(|k| k.as_str()).filter(|k| !k.is_empty())
}

/// 1件の規則を評価
///
/// # Arguments
/// * `text` - 入力テキスト（内部で trim する）
/// * `rule` - 評価対象の規則
///
/// # Returns
/// 規則に一致すれば true
pub fn evaluate(text: &str, rule: &CategoryRule) -> bool {
    let text = text.trim();
    if text.is_empty() {
        return false;
    }

    // 除外キーワード
    if non_empty(&rule.must_not_contain).any(|k| text.contains(k)) {
        return false;
    }

    let mut any_group = false;

    // OR グループ
    if non_empty(&rule.keyword_group_5).next().is_some() {
        any_group = true;
        if !non_empty(&rule.keyword_group_5).any(|k| text.contains(k)) {
            return false;
        }
    }

    // AND グループ: 空でないグループのうち1つでも全キーワードを含めば可
    let and_groups: Vec<&[String]> = rule
        .and_groups()
        .into_iter()
        .filter(|g| non_empty(g).next().is_some())
        .collect();

    if !and_groups.is_empty() {
        any_group = true;
        let satisfied = and_groups
            .iter()
            .any(|g| non_empty(g).all(|k| text.contains(k)));
        if !satisfied {
            return false;
        }
    }

    any_group
}

/// 全規則を規則表の順に評価し、一致したものをすべて返す
///
/// 呼び出し側は先頭を代表とする。
pub fn match_all(text: &str, rules: &[CategoryRule]) -> Vec<CategoryRule> {
    rules
        .iter()
        .filter(|rule| evaluate(text, rule))
        .cloned()
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn words(list: &[&str]) -> Vec<String> {
        list.iter().map(|s| s.to_string()).collect()
    }

    fn rule_with_group1(list: &[&str]) -> CategoryRule {
        CategoryRule {
            atomic_category: "奶茶".to_string(),
            keyword_group_1: words(list),
            ..Default::default()
        }
    }

    // =============================================
    // 基本動作
    // =============================================

    #[test]
    fn test_empty_groups_never_match() {
        let rule = CategoryRule {
            must_not_contain: words(&["咖啡"]),
            ..Default::default()
        };
        assert!(!evaluate("喜茶奶茶店", &rule));
        assert!(!evaluate("任意文本", &CategoryRule::default()));
    }

    #[test]
    fn test_groups_of_blank_keywords_treated_as_empty() {
        let rule = CategoryRule {
            keyword_group_1: words(&[""]),
            keyword_group_5: words(&[""]),
            ..Default::default()
        };
        assert!(!evaluate("喜茶", &rule));
    }

    #[test]
    fn test_empty_text_rejected() {
        let rule = rule_with_group1(&["奶茶"]);
        assert!(!evaluate("", &rule));
        assert!(!evaluate("   ", &rule));
    }

    #[test]
    fn test_and_group_requires_all_keywords_any_order() {
        let rule = rule_with_group1(&["a", "b"]);
        assert!(evaluate("ab", &rule));
        assert!(evaluate("b...a", &rule));
        assert!(!evaluate("a only", &rule));
        assert!(!evaluate("only b", &rule));
    }

    #[test]
    fn test_any_and_group_suffices() {
        let rule = CategoryRule {
            keyword_group_1: words(&["火锅", "串串"]),
            keyword_group_2: words(&["麻辣烫"]),
            ..Default::default()
        };
        assert!(evaluate("杨国福麻辣烫", &rule));
        assert!(evaluate("串串火锅", &rule));
        assert!(!evaluate("火锅", &rule));
    }

    #[test]
    fn test_or_group() {
        let rule = CategoryRule {
            keyword_group_5: words(&["咖啡", "coffee"]),
            ..Default::default()
        };
        assert!(evaluate("瑞幸咖啡", &rule));
        assert!(evaluate("luckin coffee", &rule));
        assert!(!evaluate("奶茶", &rule));
    }

    #[test]
    fn test_or_group_and_and_group_both_required() {
        let rule = CategoryRule {
            keyword_group_1: words(&["烤"]),
            keyword_group_5: words(&["鸭", "鸡"]),
            ..Default::default()
        };
        assert!(evaluate("烤鸭店", &rule));
        assert!(!evaluate("烤肉店", &rule));
        assert!(!evaluate("盐水鸭", &rule));
    }

    #[test]
    fn test_must_not_contain_forces_false() {
        let rule = CategoryRule {
            keyword_group_1: words(&["奶茶"]),
            must_not_contain: words(&["", "设备"]),
            ..Default::default()
        };
        assert!(evaluate("奶茶店", &rule));
        assert!(!evaluate("奶茶设备批发", &rule));
    }

    #[test]
    fn test_case_sensitive() {
        let rule = rule_with_group1(&["KFC"]);
        assert!(evaluate("KFC 肯德基", &rule));
        assert!(!evaluate("kfc 肯德基", &rule));
    }

    #[test]
    fn test_text_is_trimmed() {
        let rule = CategoryRule {
            keyword_group_5: words(&["店 "]),
            ..Default::default()
        };
        // 末尾の空白は除去されるので "店 " は含まれない
        assert!(!evaluate("奶茶店 ", &rule));
    }

    // =============================================
    // match_all
    // =============================================

    #[test]
    fn test_match_all_catalog_order() {
        let mut first = rule_with_group1(&["奶茶"]);
        first.atomic_category = "奶茶".to_string();
        let mut second = CategoryRule {
            keyword_group_5: words(&["喜茶"]),
            ..Default::default()
        };
        second.atomic_category = "茶饮".to_string();
        let third = rule_with_group1(&["咖啡"]);

        let rules = vec![first, second, third];
        let matched = match_all("喜茶奶茶店", &rules);
        assert_eq!(matched.len(), 2);
        assert_eq!(matched[0].atomic_category, "奶茶");
        assert_eq!(matched[1].atomic_category, "茶饮");
    }

    #[test]
    fn test_match_all_no_rules() {
        assert!(match_all("喜茶", &[]).is_empty());
    }

    #[test]
    fn test_scenario_milk_tea_rule() {
        let rules = vec![rule_with_group1(&["奶茶"])];
        let matched = match_all("喜茶奶茶店", &rules);
        assert_eq!(matched.len(), 1);
        assert_eq!(matched[0].atomic_category, "奶茶");
    }
}
