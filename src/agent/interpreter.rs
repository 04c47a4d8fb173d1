//! Response interpretation: find the script in a model reply, if any.

use std::sync::OnceLock;

use regex::Regex;
use serde::{Deserialize, Serialize};

/// Fence marker delimiting a code block.
pub const FENCE: &str = "```";

/// How scripts are pulled out of a response.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExtractionPolicy {
    /// Split on the first two fence markers anywhere in the text.
    #[default]
    FirstBlock,
    /// Join every line-anchored fenced block into one script.
    CombineAll,
}

/// `None` means the response is a final answer.
pub fn extract_script(response: &str, policy: ExtractionPolicy) -> Option<String> {
    match policy {
        ExtractionPolicy::FirstBlock => extract_first_block(response),
        ExtractionPolicy::CombineAll => extract_all_blocks(response),
    }
}

/// Text between the first and second fence markers, minus the tag line.
///
/// A single fence marker is not a script. Anything after the second marker is
/// ignored. Lines are rejoined with `\n`, so `\r\n` endings are normalized.
pub fn extract_first_block(response: &str) -> Option<String> {
    let mut parts = response.splitn(3, FENCE);
    parts.next()?;
    let span = parts.next()?;
    parts.next()?;

    Some(span.lines().skip(1).collect::<Vec<_>>().join("\n"))
}

fn block_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(r"(?s)(?:^|\n)```(.*?)(?:```(?:\n|$))").expect("fence pattern is valid")
    })
}

/// Every fenced block whose opening marker starts a line, joined by blank lines.
///
/// A block's first line is dropped when it is empty or has no spaces, which is
/// what a language tag looks like.
pub fn extract_all_blocks(response: &str) -> Option<String> {
    let blocks: Vec<String> = block_pattern()
        .captures_iter(response)
        .filter_map(|caps| caps.get(1))
        .map(|m| {
            let block = m.as_str().trim();
            match block.split_once('\n') {
                Some((first, rest)) if !first.trim().contains(' ') => rest.to_string(),
                Some(_) => block.to_string(),
                None if !block.contains(' ') => String::new(),
                None => block.to_string(),
            }
        })
        .collect();

    if blocks.is_empty() {
        None
    } else {
        Some(blocks.join("\n\n"))
    }
}
