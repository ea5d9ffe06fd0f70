//! 文本分块器
//!
//! 将任意长度文本切分为有序、有界、按句子对齐的块

use super::chunk::{Chunk, Seq, TextSpan};

/// 默认目标词数
pub const DEFAULT_TARGET_WORDS: usize = 150;

/// 默认分块阈值：总词数不超过此值时整段作为一个块
pub const DEFAULT_THRESHOLD_WORDS: usize = 200;

/// 默认最大块数
pub const DEFAULT_MAX_CHUNKS: usize = 10_000;

/// 分块配置
#[derive(Debug, Clone)]
pub struct ChunkerConfig {
    /// 每块目标词数（单句超长时允许超出）
    pub target_words: usize,
    /// 启用分块的总词数阈值
    pub threshold_words: usize,
    /// 最大块数，达到上限时最后一块吸收剩余全部文本
    pub max_chunks: usize,
}

impl Default for ChunkerConfig {
    fn default() -> Self {
        Self {
            target_words: DEFAULT_TARGET_WORDS,
            threshold_words: DEFAULT_THRESHOLD_WORDS,
            max_chunks: DEFAULT_MAX_CHUNKS,
        }
    }
}

/// 检查是否为句末标点
#[inline]
fn is_sentence_delimiter(ch: char) -> bool {
    matches!(ch, '.' | '!' | '?')
}

/// 一个完整句子（包含其后的空白）
#[derive(Debug, Clone, Copy)]
struct Sentence {
    /// 句子结束的字节位置（不含）
    end: usize,
    chars: usize,
    words: usize,
}

/// 从字节位置 `from` 开始扫描下一个句子
///
/// 句末标点后跟空白或文本结束才算句子结束；句后空白归属本句，
/// 因此相邻句子首尾相接，不丢失任何字符。
fn next_sentence(text: &str, from: usize) -> Option<Sentence> {
    let rest = &text[from..];
    if rest.is_empty() {
        return None;
    }

    let mut chars = 0;
    let mut words = 0;
    let mut in_word = false;
    let mut prev_delimiter = false;
    let mut closing = false;

    for (i, ch) in rest.char_indices() {
        if closing && !ch.is_whitespace() {
            return Some(Sentence {
                end: from + i,
                chars,
                words,
            });
        }

        chars += 1;
        if ch.is_whitespace() {
            if prev_delimiter {
                closing = true;
            }
            in_word = false;
        } else if !in_word {
            words += 1;
            in_word = true;
        }
        prev_delimiter = is_sentence_delimiter(ch);
    }

    Some(Sentence {
        end: text.len(),
        chars,
        words,
    })
}

/// 分块器
///
/// 持有原文引用，`chunks()` 每次调用都从头开始生成（可重启、惰性、有限）
#[derive(Debug, Clone)]
pub struct Chunker<'a> {
    text: &'a str,
    config: ChunkerConfig,
    /// 总词数未超过阈值时整段作为一个块
    whole: bool,
}

impl<'a> Chunker<'a> {
    pub fn new(text: &'a str, config: ChunkerConfig) -> Self {
        let total_words = text.split_whitespace().count();
        let whole = total_words <= config.threshold_words;
        Self {
            text,
            config,
            whole,
        }
    }

    /// 是否启用了分块
    pub fn is_chunked(&self) -> bool {
        !self.whole
    }

    /// 原文字符总数
    pub fn total_chars(&self) -> usize {
        self.text.chars().count()
    }

    /// 从头生成块序列
    pub fn chunks(&self) -> Chunks<'_> {
        Chunks {
            text: self.text,
            config: &self.config,
            whole: self.whole,
            byte_pos: 0,
            char_pos: 0,
            next_seq: 0,
        }
    }

    /// 从包含 `char_offset` 的句子开头生成块序列（用于恢复会话）
    ///
    /// 序列号仍从 0 开始，span 仍为原文中的绝对偏移
    pub fn chunks_from(&self, char_offset: usize) -> Chunks<'_> {
        let mut byte_pos = 0;
        let mut char_pos = 0;

        while let Some(sentence) = next_sentence(self.text, byte_pos) {
            if char_pos + sentence.chars > char_offset {
                break;
            }
            byte_pos = sentence.end;
            char_pos += sentence.chars;
        }

        Chunks {
            text: self.text,
            config: &self.config,
            whole: self.whole,
            byte_pos,
            char_pos,
            next_seq: 0,
        }
    }
}

/// 惰性块迭代器
#[derive(Debug, Clone)]
pub struct Chunks<'c> {
    text: &'c str,
    config: &'c ChunkerConfig,
    whole: bool,
    byte_pos: usize,
    char_pos: usize,
    next_seq: Seq,
}

impl Chunks<'_> {
    fn emit(&mut self, end_byte: usize, chars: usize, words: usize) -> Option<Chunk> {
        let start_byte = self.byte_pos;
        let start_char = self.char_pos;
        self.byte_pos = end_byte;
        self.char_pos += chars;

        if words == 0 {
            // 只剩空白
            return None;
        }

        let chunk = Chunk {
            seq: self.next_seq,
            span: TextSpan::new(start_char, start_char + chars),
            text: self.text[start_byte..end_byte].to_string(),
            word_count: words,
        };
        self.next_seq += 1;
        Some(chunk)
    }
}

impl Iterator for Chunks<'_> {
    type Item = Chunk;

    fn next(&mut self) -> Option<Chunk> {
        if self.byte_pos >= self.text.len() {
            return None;
        }

        let last_allowed = self.next_seq + 1 >= self.config.max_chunks.max(1) as Seq;
        if self.whole || last_allowed {
            let rest = &self.text[self.byte_pos..];
            let chars = rest.chars().count();
            let words = rest.split_whitespace().count();
            return self.emit(self.text.len(), chars, words);
        }

        let mut end_byte = self.byte_pos;
        let mut chars = 0;
        let mut words = 0;

        while let Some(sentence) = next_sentence(self.text, end_byte) {
            // 超长单句不拆分：块为空时总是接收
            if words > 0 && words + sentence.words > self.config.target_words {
                break;
            }
            end_byte = sentence.end;
            chars += sentence.chars;
            words += sentence.words;
        }

        self.emit(end_byte, chars, words)
    }
}

/// 一次性生成全部块（便捷方法）
pub fn chunk_text(text: &str, config: &ChunkerConfig) -> Vec<Chunk> {
    Chunker::new(text, config.clone()).chunks().collect()
}
