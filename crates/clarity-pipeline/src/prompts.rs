//! Built-in prompt texts.

use clarity_core::types::{Language, Summary};

const VIDEO_PROMPT_ZH: &str = "分析这段屏幕活动视频，提供简洁的活动摘要。重点关注：1) 主要使用的应用/网站；2) 活动类型（工作/娱乐/学习等）；3) 是否有分心或低效行为。用中文回答，控制在100字以内。";

const VIDEO_PROMPT_EN: &str = "Analyze this screen activity video and provide a concise activity summary. Focus on: 1) Main apps/websites used; 2) Activity type (work/entertainment/learning, etc.); 3) Any distractions or inefficient behaviors. Respond in English, keep it under 100 words.";

const DAILY_HEADER_ZH: &str = "基于以下今天的所有活动摘要，生成一份综合的每日总结。包括：1) 整体效率评估；2) 主要活动和时间分布；3) 关键洞察和改进建议。\n\n今天的摘要：\n";

const DAILY_HEADER_EN: &str = "Based on the following activity summaries from today, provide a comprehensive daily summary. Include: 1) Overall productivity assessment; 2) Main activities and time distribution; 3) Key insights and recommendations for improvement.\n\nToday's summaries:\n";

/// Default prompt sent with each window video.
pub fn default_video_prompt(language: Language) -> &'static str {
    match language {
        Language::En => VIDEO_PROMPT_EN,
        Language::Zh => VIDEO_PROMPT_ZH,
    }
}

/// Prompt for the day-level roll-up: a fixed header followed by the window
/// summaries in order, separated by blank lines.
pub fn daily_prompt(language: Language, summaries: &[Summary]) -> String {
    let header = match language {
        Language::En => DAILY_HEADER_EN,
        Language::Zh => DAILY_HEADER_ZH,
    };
    let body = summaries
        .iter()
        .map(|s| s.content.as_str())
        .collect::<Vec<_>>()
        .join("\n\n");
    format!("{header}{body}")
}

/// Content stored for a day without any window summaries.
pub fn empty_day_text(language: Language) -> &'static str {
    match language {
        Language::En => "No activity recorded for this day.",
        Language::Zh => "今天没有记录任何活动。",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};

    fn summary(content: &str) -> Summary {
        let t = Utc.timestamp_opt(1_700_000_000, 0).unwrap();
        Summary {
            id: 1,
            start_time: t,
            end_time: t + chrono::Duration::seconds(45),
            content: content.into(),
            screenshot_count: 45,
            created_at: t,
        }
    }

    #[test]
    fn test_daily_prompt_joins_summaries() {
        let prompt = daily_prompt(Language::En, &[summary("Coding"), summary("Email")]);
        assert!(prompt.starts_with("Based on the following activity summaries"));
        assert!(prompt.ends_with("Today's summaries:\nCoding\n\nEmail"));
    }

    #[test]
    fn test_language_selection() {
        assert!(default_video_prompt(Language::En).starts_with("Analyze"));
        assert!(default_video_prompt(Language::Zh).starts_with("分析"));
        assert_eq!(empty_day_text(Language::Zh), "今天没有记录任何活动。");
        assert!(daily_prompt(Language::Zh, &[summary("写代码")]).ends_with("今天的摘要：\n写代码"));
    }
}
