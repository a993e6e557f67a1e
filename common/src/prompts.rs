//! プロンプト生成モジュール
//!
//! LLM 検索フォールバック用のシステムプロンプトを組み立てる:
//! - PROMPT_BASE: 役割・タスク・出力形式
//! - build_keyword_hint: 規則表から参考キーワードを抽出
//! - build_system_prompt: 参考キーワードとツール方針を連結

use crate::types::CategoryRule;

/// 役割と出力形式
pub const PROMPT_BASE: &str = r#"# 角色

你是品类描述助手。

## 任务

用户给出一段门店或商品的品类文本（品牌名、业态名或短句），请输出一段能够被关键词规则库命中的品类描述。

## 输出要求

- 只输出品类词，用顿号或逗号连接成一句，不要写介绍句式（如「XX是一家……」）。
- 尽量多写，至少 15 个相关词：品类本名、同义词、近义词、细分类型、相关业态、常见叫法。
- 示例：茶百道 → 奶茶、果茶、新式茶饮、现制饮品、奶盖茶、茶饮店、手摇茶、鲜果茶、珍珠奶茶、芝士茶、饮品、冷饮、甜品饮料、茶饮加盟、现制茶饮
- 只输出一行，不分点、不加标题、不解释原因。
- 不要输出「无法判断」「无明确品类」之类的否定式描述。
"#;

/// 参考キーワード（{reference_keywords} を置換）
const PROMPT_WITH_KEYWORDS: &str = r#"
## 参考词汇

可优先选用：{reference_keywords}
"#;

/// ツール使用方針（ツールがある場合のみ末尾に連結）
pub const PROMPT_TOOLS: &str = r#"
## 工具使用

本会话提供搜索等工具，可查询品牌、业态和陌生词汇。

### 直接输出，不调用工具

- 广为人知的品牌或业态（如蜜雪冰城、沙县小吃、肯德基）。
- 名称本身已说明品类（如「XX奶茶」「XX面馆」「麻辣烫」）。

### 先调用工具再输出

- 名称中看不出品类、缩写、生僻词或无意义文本。
- 未调用工具前不得给出否定式回答。

### 搜索关键词

- 第一次搜索必须原样使用用户输入的文本作为查询。
- 之后的搜索可以改写关键词，改写时贴合餐饮食品行业（品类细分、食材口味、业态、菜系）。
- 根据搜索结果提炼品类词，按上面的格式输出，尽量使用参考词汇。
- 搜索仍没有结果时，直接回复「未匹配到结果」。
"#;

/// プロンプト生成オプション
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PromptOptions {
    /// 参考キーワードの最大件数
    pub max_keyword_examples: usize,
    /// 参考キーワード文字列の最大文字数
    pub max_keyword_hint_chars: usize,
}

impl Default for PromptOptions {
    fn default() -> Self {
        Self {
            max_keyword_examples: 10,
            max_keyword_hint_chars: 120,
        }
    }
}

/// 規則表から参考キーワードを抽出
///
/// 規則表の順に原子品类とキーワードグループ1〜5を走査し、重複を除いて
/// 最大 `max_keyword_examples` 件を `、` で連結する。文字数上限を超える場合は
/// 上限内の最後の `、` で切る。
///
/// # Returns
/// 参考キーワード文字列（該当なしは空文字）
pub fn build_keyword_hint(rules: &[CategoryRule], options: &PromptOptions) -> String {
    let max = options.max_keyword_examples;
    if max == 0 {
        return String::new();
    }

    let mut words: Vec<&str> = Vec::new();

    'outer: for rule in rules {
        let atomic = rule.atomic_category.trim();
        if !atomic.is_empty() && !words.contains(&atomic) {
            words.push(atomic);
            if words.len() >= max {
                break;
            }
        }
        let groups = [
            &rule.keyword_group_1,
            &rule.keyword_group_2,
            &rule.keyword_group_3,
            &rule.keyword_group_4,
            &rule.keyword_group_5,
        ];
        for group in groups {
            for kw in group.iter() {
                let kw = kw.trim();
                if !kw.is_empty() && !words.contains(&kw) {
                    words.push(kw);
                }
                if words.len() >= max {
                    break 'outer;
                }
            }
        }
    }

    if words.is_empty() {
        return String::new();
    }

    words.truncate(max);
    let joined = words.join("、");
    truncate_on_separator(&joined, options.max_keyword_hint_chars)
}

/// 文字数上限で切る（上限内に `、` があればその手前まで）
fn truncate_on_separator(s: &str, max_chars: usize) -> String {
    if s.chars().count() <= max_chars {
        return s.to_string();
    }
    let head: String = s.chars().take(max_chars).collect();
    match head.rfind('、') {
        Some(pos) => head[..pos].to_string(),
        None => head,
    }
}

/// システムプロンプトを組み立て
///
/// # Arguments
/// * `keyword_hint` - 参考キーワード（空なら省略）
/// * `has_tools` - ツールが利用可能か
pub fn build_system_prompt(keyword_hint: &str, has_tools: bool) -> String {
    let mut prompt = PROMPT_BASE.trim_end().to_string();
    if !keyword_hint.trim().is_empty() {
        prompt.push('\n');
        prompt.push_str(&PROMPT_WITH_KEYWORDS.replace("{reference_keywords}", keyword_hint.trim()));
    }
    if has_tools {
        prompt.push('\n');
        prompt.push_str(PROMPT_TOOLS);
    }
    prompt
}
