use cwnd_lab_abstract::{Connection, ConnectionQuery, SampleSource, SourceError};
use std::collections::VecDeque;

/// What the source reports during one sampler tick.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Frame {
    /// Established connections in listing order.
    Up(Vec<Connection>),
    /// Every query during this tick fails.
    Down,
}

/// A replay source driven by a fixed list of frames.
///
/// An unfiltered query advances to the next frame; a query that excludes a
/// local port reads the current frame. This matches the sampler's
/// enumerate-then-requery pattern, so both phases of one tick observe the
/// same connection set.
#[derive(Debug, Clone, Default)]
pub struct ScriptedSource {
    frames: VecDeque<Frame>,
    current: Option<Frame>,
}

impl ScriptedSource {
    pub fn new(frames: impl IntoIterator<Item = Frame>) -> Self {
        Self {
            frames: frames.into_iter().collect(),
            current: None,
        }
    }

    /// Parse a replay script. One frame per line:
    ///
    /// ```text
    /// # control first, then data connections as port:cwnd
    /// 45670:10 45672:87 45674:64
    /// 45670:10 45672:-        # no cwnd reported
    /// -                       # nothing established
    /// !                       # query failure
    /// ```
    pub fn from_script(script: &str) -> anyhow::Result<Self> {
        let mut frames = Vec::new();
        for (idx, raw) in script.lines().enumerate() {
            let line = raw.split('#').next().unwrap_or_default().trim();
            if line.is_empty() {
                continue;
            }
            let frame = match line {
                "!" => Frame::Down,
                "-" => Frame::Up(Vec::new()),
                _ => Frame::Up(
                    line.split_whitespace()
                        .map(parse_connection)
                        .collect::<Option<Vec<_>>>()
                        .ok_or_else(|| {
                            anyhow::anyhow!("line {}: expected port:cwnd tokens, got {raw:?}", idx + 1)
                        })?,
                ),
            };
            frames.push(frame);
        }
        Ok(Self::new(frames))
    }

    pub fn remaining(&self) -> usize {
        self.frames.len()
    }

    fn snapshot(&mut self, query: &ConnectionQuery) -> Result<Vec<Connection>, SourceError> {
        if query.exclude_local_port.is_none() {
            self.current = self.frames.pop_front();
        }
        match &self.current {
            None => Err(SourceError::Exhausted),
            Some(Frame::Down) => Err(SourceError::Failed {
                command: "scripted".into(),
                status: "frame marked down".into(),
                stderr: String::new(),
            }),
            Some(Frame::Up(conns)) => Ok(conns
                .iter()
                .filter(|c| Some(c.local_port) != query.exclude_local_port)
                .copied()
                .collect()),
        }
    }
}

fn parse_connection(token: &str) -> Option<Connection> {
    let (port, cwnd) = token.split_once(':')?;
    let cwnd = match cwnd {
        "-" => None,
        v => Some(v.parse().ok()?),
    };
    Some(Connection {
        local_port: port.parse().ok()?,
        cwnd,
    })
}

impl SampleSource for ScriptedSource {
    async fn established(
        &mut self,
        query: &ConnectionQuery,
    ) -> Result<Vec<Connection>, SourceError> {
        self.snapshot(query)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use cwnd_lab_abstract::Destination;

    fn dest() -> Destination {
        "10.0.0.3:5201".parse().unwrap()
    }

    #[tokio::test]
    async fn requery_sees_the_same_frame() {
        let mut source = ScriptedSource::from_script("100:10 101:80 102:60\n200:12\n").unwrap();
        let all = source.established(&ConnectionQuery::all(dest())).await.unwrap();
        assert_eq!(all.len(), 3);
        let data = source
            .established(&ConnectionQuery::excluding(dest(), 100))
            .await
            .unwrap();
        assert_eq!(
            data.iter().map(|c| c.cwnd).collect::<Vec<_>>(),
            vec![Some(80), Some(60)]
        );

        let next = source.established(&ConnectionQuery::all(dest())).await.unwrap();
        assert_eq!(next[0].local_port, 200);
        assert_eq!(source.remaining(), 0);
    }

    #[tokio::test]
    async fn down_and_exhausted_frames_fail() {
        let mut source = ScriptedSource::from_script("!\n").unwrap();
        assert!(source.established(&ConnectionQuery::all(dest())).await.is_err());
        assert!(matches!(
            source.established(&ConnectionQuery::all(dest())).await,
            Err(SourceError::Exhausted)
        ));
    }

    #[test]
    fn script_syntax() {
        let source = ScriptedSource::from_script("# header\n-\n1:-\n\n").unwrap();
        assert_eq!(source.remaining(), 2);
        assert!(ScriptedSource::from_script("1:x\n").is_err());
    }
}
