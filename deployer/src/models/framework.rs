//! Framework labels

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// Closed classification of a source tree's technology stack
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Framework {
    #[serde(rename = "php")]
    Php,
    #[serde(rename = "lamp")]
    Lamp,
    #[serde(rename = "mern")]
    Mern,
    #[serde(rename = "node-next")]
    NodeNext,
    #[serde(rename = "node-react")]
    NodeReact,
    #[serde(rename = "node-vue")]
    NodeVue,
    #[serde(rename = "node")]
    Node,
    #[serde(rename = "python-django")]
    PythonDjango,
    #[serde(rename = "python-flask")]
    PythonFlask,
    #[serde(rename = "java-maven")]
    JavaMaven,
    #[serde(rename = "java-gradle")]
    JavaGradle,
    #[serde(rename = "static")]
    Static,
    #[serde(rename = "unknown")]
    Unknown,
}

impl Framework {
    pub const ALL: [Framework; 13] = [
        Framework::Php,
        Framework::Lamp,
        Framework::Mern,
        Framework::NodeNext,
        Framework::NodeReact,
        Framework::NodeVue,
        Framework::Node,
        Framework::PythonDjango,
        Framework::PythonFlask,
        Framework::JavaMaven,
        Framework::JavaGradle,
        Framework::Static,
        Framework::Unknown,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Framework::Php => "php",
            Framework::Lamp => "lamp",
            Framework::Mern => "mern",
            Framework::NodeNext => "node-next",
            Framework::NodeReact => "node-react",
            Framework::NodeVue => "node-vue",
            Framework::Node => "node",
            Framework::PythonDjango => "python-django",
            Framework::PythonFlask => "python-flask",
            Framework::JavaMaven => "java-maven",
            Framework::JavaGradle => "java-gradle",
            Framework::Static => "static",
            Framework::Unknown => "unknown",
        }
    }

    /// Node-based labels share one build template
    pub fn is_node(&self) -> bool {
        matches!(
            self,
            Framework::Mern
                | Framework::NodeNext
                | Framework::NodeReact
                | Framework::NodeVue
                | Framework::Node
        )
    }
}

impl fmt::Display for Framework {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Framework {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim().to_lowercase();
        Framework::ALL
            .iter()
            .find(|f| f.as_str() == s)
            .copied()
            .ok_or_else(|| format!("Unknown framework label: {}", s))
    }
}
