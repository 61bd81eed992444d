use crate::error::ParseForwardPortError;

/// A `src:dst` mapping served by one proxy server
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ForwardPort {
    pub src_port: u16,
    pub dst_port: u16,
}

impl ForwardPort {
    pub fn new(src_port: u16, dst_port: u16) -> Self {
        Self { src_port, dst_port }
    }
}

impl std::fmt::Display for ForwardPort {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:{}", self.src_port, self.dst_port)
    }
}

impl std::str::FromStr for ForwardPort {
    type Err = ParseForwardPortError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        let (src, dst) =
            value
                .split_once(':')
                .ok_or_else(|| ParseForwardPortError::MissingSeparator {
                    value: value.to_string(),
                })?;

        let src_port = src
            .parse()
            .map_err(|source| ParseForwardPortError::InvalidSource {
                value: value.to_string(),
                part: src.to_string(),
                source,
            })?;
        let dst_port = dst
            .parse()
            .map_err(|source| ParseForwardPortError::InvalidDestination {
                value: value.to_string(),
                part: dst.to_string(),
                source,
            })?;

        Ok(Self { src_port, dst_port })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_forward_port() {
        let port: ForwardPort = "50550:50551".parse().unwrap();
        assert_eq!(port, ForwardPort::new(50550, 50551));
        assert_eq!(port.to_string(), "50550:50551");
    }

    #[test]
    fn test_parse_same_port_twice() {
        let port: ForwardPort = "8080:8080".parse().unwrap();
        assert_eq!(port.src_port, port.dst_port);
    }

    #[test]
    fn test_missing_separator() {
        let err = "8080".parse::<ForwardPort>().unwrap_err();
        assert!(matches!(err, ParseForwardPortError::MissingSeparator { .. }));
        assert!(err.to_string().contains("'8080'"));
    }

    #[test]
    fn test_invalid_parts() {
        assert!(matches!(
            "abc:80".parse::<ForwardPort>(),
            Err(ParseForwardPortError::InvalidSource { .. })
        ));
        assert!(matches!(
            "80:".parse::<ForwardPort>(),
            Err(ParseForwardPortError::InvalidDestination { .. })
        ));
        assert!(matches!(
            "-1:80".parse::<ForwardPort>(),
            Err(ParseForwardPortError::InvalidSource { .. })
        ));
        assert!(matches!(
            "80:70000".parse::<ForwardPort>(),
            Err(ParseForwardPortError::InvalidDestination { .. })
        ));
    }
}
