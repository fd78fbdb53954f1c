use serde::Deserialize;

/// ChunkingStrategy 名。ChunksPrepared に記録する。
pub const STRATEGY_NAME: &str = "token_window";

/// ChunkerConfig は単語ウィンドウ分割の設定。
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct ChunkerConfig {
    /// 1 チャンクの単語数
    #[serde(default = "default_chunk_size")]
    pub chunk_size: usize,
    /// 隣接チャンク間で重複させる単語数（chunk_size 未満）
    #[serde(default = "default_chunk_overlap")]
    pub chunk_overlap: usize,
    /// これより短い末尾チャンクは直前のチャンクに併合する
    #[serde(default = "default_min_chunk_size")]
    pub min_chunk_size: usize,
}

fn default_chunk_size() -> usize {
    384
}

fn default_chunk_overlap() -> usize {
    50
}

fn default_min_chunk_size() -> usize {
    100
}

impl Default for ChunkerConfig {
    fn default() -> Self {
        Self {
            chunk_size: default_chunk_size(),
            chunk_overlap: default_chunk_overlap(),
            min_chunk_size: default_min_chunk_size(),
        }
    }
}

impl ChunkerConfig {
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.chunk_size == 0 {
            anyhow::bail!("chunk_size must be greater than 0");
        }
        if self.chunk_overlap >= self.chunk_size {
            anyhow::bail!(
                "chunk_overlap ({}) must be less than chunk_size ({})",
                self.chunk_overlap,
                self.chunk_size
            );
        }
        Ok(())
    }
}

/// TextWindow は分割結果の 1 区間。オフセットは単語単位。
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TextWindow {
    pub text: String,
    pub start: usize,
    pub end: usize,
}

impl TextWindow {
    pub fn token_count(&self) -> usize {
        self.end - self.start
    }
}

/// WordWindowChunker は空白区切りの単語を固定長ウィンドウで分割する。
pub struct WordWindowChunker {
    config: ChunkerConfig,
}

impl WordWindowChunker {
    pub fn new(config: ChunkerConfig) -> anyhow::Result<Self> {
        config.validate()?;
        Ok(Self { config })
    }

    pub fn config(&self) -> &ChunkerConfig {
        &self.config
    }

    /// 本文を分割する。空の本文は 0 チャンク。
    pub fn split(&self, text: &str) -> Vec<TextWindow> {
        let words: Vec<&str> = text.split_whitespace().collect();
        if words.is_empty() {
            return Vec::new();
        }

        let step = self.config.chunk_size - self.config.chunk_overlap;
        let mut bounds = Vec::new();
        let mut start = 0;
        loop {
            let end = (start + self.config.chunk_size).min(words.len());
            bounds.push((start, end));
            if end == words.len() {
                break;
            }
            start += step;
        }

        if bounds.len() > 1 {
            if let Some(&(last_start, last_end)) = bounds.last() {
                if last_end - last_start < self.config.min_chunk_size {
                    bounds.pop();
                    if let Some(previous) = bounds.last_mut() {
                        previous.1 = last_end;
                    }
                }
            }
        }

        bounds
            .into_iter()
            .map(|(start, end)| TextWindow {
                text: words[start..end].join(" "),
                start,
                end,
            })
            .collect()
    }
}
