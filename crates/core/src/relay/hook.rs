//! Operator hooks that rewrite a session before it starts.

use async_trait::async_trait;
use thiserror::Error;

use crate::connection::{PeerInfo, StartRejection};
use crate::transcoder::SessionConfig;

/// Rewrites (or refuses) a client's session configuration at start time.
///
/// Runs after the concurrency limit and before the destination allow-list,
/// so a hook may choose the destination itself.
#[async_trait]
pub trait StartHook: Send + Sync {
    async fn rewrite(
        &self,
        peer: &PeerInfo,
        config: SessionConfig,
    ) -> Result<SessionConfig, StartRejection>;
}

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum TemplateError {
    #[error("unclosed placeholder starting at byte {0}")]
    Unclosed(usize),

    #[error("unexpected '}}' at byte {0}")]
    UnexpectedClose(usize),

    #[error("invalid placeholder name '{0}'")]
    InvalidName(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Segment {
    Literal(String),
    Param(String),
}

/// Builds the destination URL from a template and the connection's query
/// parameters, e.g. `rtmp://live.example.com/app/{key}` with `?key=abc`.
///
/// A placeholder whose parameter is absent rejects the start.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TemplateRewrite {
    segments: Vec<Segment>,
}

impl TemplateRewrite {
    pub fn parse(template: &str) -> Result<Self, TemplateError> {
        let mut segments = Vec::new();
        let mut literal = String::new();
        let mut chars = template.char_indices();

        while let Some((pos, c)) = chars.next() {
            match c {
                '{' => {
                    let mut name = String::new();
                    let mut closed = false;
                    for (_, c) in chars.by_ref() {
                        if c == '}' {
                            closed = true;
                            break;
                        }
                        name.push(c);
                    }
                    if !closed {
                        return Err(TemplateError::Unclosed(pos));
                    }
                    if name.is_empty()
                        || !name
                            .chars()
                            .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-')
                    {
                        return Err(TemplateError::InvalidName(name));
                    }
                    if !literal.is_empty() {
                        segments.push(Segment::Literal(std::mem::take(&mut literal)));
                    }
                    segments.push(Segment::Param(name));
                }
                '}' => return Err(TemplateError::UnexpectedClose(pos)),
                c => literal.push(c),
            }
        }

        if !literal.is_empty() {
            segments.push(Segment::Literal(literal));
        }
        Ok(Self { segments })
    }

    /// Placeholder names, in template order.
    pub fn params(&self) -> impl Iterator<Item = &str> {
        self.segments.iter().filter_map(|s| match s {
            Segment::Param(name) => Some(name.as_str()),
            Segment::Literal(_) => None,
        })
    }

    pub fn render(&self, peer: &PeerInfo) -> Result<String, StartRejection> {
        let mut out = String::new();
        for segment in &self.segments {
            match segment {
                Segment::Literal(text) => out.push_str(text),
                Segment::Param(name) => {
                    let value = peer
                        .query
                        .get(name)
                        .filter(|v| !v.is_empty())
                        .ok_or_else(|| {
                            StartRejection::new(format!("missing query parameter '{name}'"))
                        })?;
                    out.push_str(value);
                }
            }
        }
        Ok(out)
    }
}

#[async_trait]
impl StartHook for TemplateRewrite {
    async fn rewrite(
        &self,
        peer: &PeerInfo,
        mut config: SessionConfig,
    ) -> Result<SessionConfig, StartRejection> {
        config.rtmp = self.render(peer)?;
        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn peer(query: &[(&str, &str)]) -> PeerInfo {
        PeerInfo::new(None).with_query(
            query
                .iter()
                .map(|(k, v)| (k.to_string(), v.to_string()))
                .collect::<HashMap<_, _>>(),
        )
    }

    #[test]
    fn test_parse_collects_params() {
        let template = TemplateRewrite::parse("rtmp://{host}/live/{key}").unwrap();
        assert_eq!(template.params().collect::<Vec<_>>(), vec!["host", "key"]);
    }

    #[test]
    fn test_parse_rejects_malformed_templates() {
        assert_eq!(
            TemplateRewrite::parse("rtmp://x/{key"),
            Err(TemplateError::Unclosed(9))
        );
        assert_eq!(
            TemplateRewrite::parse("rtmp://x/key}"),
            Err(TemplateError::UnexpectedClose(12))
        );
        assert!(matches!(
            TemplateRewrite::parse("rtmp://x/{}"),
            Err(TemplateError::InvalidName(_))
        ));
        assert!(matches!(
            TemplateRewrite::parse("rtmp://x/{a b}"),
            Err(TemplateError::InvalidName(_))
        ));
    }

    #[test]
    fn test_render_substitutes_query_values() {
        let template = TemplateRewrite::parse("rtmp://live.example.com/app/{key}").unwrap();
        let rendered = template.render(&peer(&[("key", "abc123")])).unwrap();
        assert_eq!(rendered, "rtmp://live.example.com/app/abc123");
    }

    #[test]
    fn test_render_rejects_missing_param() {
        let template = TemplateRewrite::parse("rtmp://x/{key}").unwrap();
        let err = template.render(&peer(&[])).unwrap_err();
        assert_eq!(err.reason, "missing query parameter 'key'");

        let err = template.render(&peer(&[("key", "")])).unwrap_err();
        assert_eq!(err.reason, "missing query parameter 'key'");
    }

    #[tokio::test]
    async fn test_hook_replaces_destination_only() {
        let template = TemplateRewrite::parse("rtmp://x/{key}").unwrap();
        let config = SessionConfig::new(30, 48000, "rtmp://client/chosen");

        let rewritten = template
            .rewrite(&peer(&[("key", "k")]), config)
            .await
            .unwrap();

        assert_eq!(rewritten.rtmp, "rtmp://x/k");
        assert_eq!(rewritten.framerate, 30);
        assert_eq!(rewritten.audio_sample_rate, 48000);
    }
}
