// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

use serde::{Deserialize, Serialize};
use std::fmt::Display;

/// A CloudWatch Logs destination: one log stream inside one log group.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Target {
    pub group: String,
    pub stream: String,
}

impl Target {
    pub fn new(group: impl Into<String>, stream: impl Into<String>) -> Self {
        Target {
            group: group.into(),
            stream: stream.into(),
        }
    }
}

impl Display for Target {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}", self.group, self.stream)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn test_same_pair_is_same_key() {
        let mut map = HashMap::new();
        map.insert(Target::new("g", "s"), 1);
        map.insert(Target::new("g", "s"), 2);
        map.insert(Target::new("g", "other"), 3);

        assert_eq!(map.len(), 2);
        assert_eq!(map.get(&Target::new("g", "s")), Some(&2));
    }

    #[test]
    fn test_display() {
        assert_eq!(Target::new("group", "stream").to_string(), "group/stream");
    }
}
