//! Framework detection for checked-out source trees

use std::collections::BTreeSet;

use serde_json::Value;
use tracing::debug;

use crate::errors::AppError;
use crate::filesys::dir::Dir;
use crate::models::framework::Framework;

/// The parts of a source tree the detector looks at
#[derive(Debug, Clone, Default)]
pub struct TreeSnapshot {
    /// Names of the entries at the tree root
    pub root_entries: BTreeSet<String>,
    /// `public/.htaccess` exists
    pub public_htaccess: bool,
    /// Raw `package.json` contents, if present
    pub package_manifest: Option<String>,
}

impl TreeSnapshot {
    pub async fn read(root: &Dir) -> Result<Self, AppError> {
        let root_entries: BTreeSet<String> = root.entry_names().await?.into_iter().collect();

        let public_htaccess = root.subdir("public").file(".htaccess").exists().await;

        let package_manifest = if root_entries.contains("package.json") {
            Some(root.file("package.json").read_string().await?)
        } else {
            None
        };

        Ok(Self {
            root_entries,
            public_htaccess,
            package_manifest,
        })
    }

    fn has(&self, name: &str) -> bool {
        self.root_entries.contains(name)
    }

    fn has_extension(&self, ext: &str) -> bool {
        self.root_entries.iter().any(|name| name.ends_with(ext))
    }
}

/// Classify the tree rooted at `root`
pub async fn detect(root: &Dir) -> Result<Framework, AppError> {
    let snapshot = TreeSnapshot::read(root).await?;
    let framework = classify(&snapshot);
    debug!("Detected framework {} for {}", framework, root.path().display());
    Ok(framework)
}

/// Ordered, first-match classification
pub fn classify(tree: &TreeSnapshot) -> Framework {
    if tree.has("composer.json") || tree.has_extension(".php") {
        return if tree.public_htaccess {
            Framework::Lamp
        } else {
            Framework::Php
        };
    }

    if let Some(manifest) = &tree.package_manifest {
        return classify_node(manifest);
    }

    if tree.has("requirements.txt") || tree.has("Pipfile") {
        if tree.has("manage.py") {
            return Framework::PythonDjango;
        }
        if tree.has("app.py") || tree.has_extension(".py") {
            return Framework::PythonFlask;
        }
    }

    if tree.has("pom.xml") {
        return Framework::JavaMaven;
    }
    if tree.has("build.gradle") || tree.has("build.gradle.kts") {
        return Framework::JavaGradle;
    }

    if tree.has("index.html") {
        return Framework::Static;
    }

    Framework::Unknown
}

fn classify_node(manifest: &str) -> Framework {
    let declared = declared_packages(manifest);
    let declares = |name: &str| match &declared {
        Some(names) => names.contains(name),
        // unparseable manifest: fall back to a text search
        None => manifest.contains(&format!("\"{}\"", name)),
    };

    if declares("express") && declares("mongoose") && declares("react") {
        Framework::Mern
    } else if declares("next") {
        Framework::NodeNext
    } else if declares("react") {
        Framework::NodeReact
    } else if declares("vue") {
        Framework::NodeVue
    } else {
        Framework::Node
    }
}

/// Package names from `dependencies` and `devDependencies`
fn declared_packages(manifest: &str) -> Option<BTreeSet<String>> {
    let value: Value = serde_json::from_str(manifest).ok()?;
    let mut names = BTreeSet::new();
    for section in ["dependencies", "devDependencies"] {
        if let Some(deps) = value.get(section).and_then(Value::as_object) {
            names.extend(deps.keys().cloned());
        }
    }
    Some(names)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tree(entries: &[&str]) -> TreeSnapshot {
        TreeSnapshot {
            root_entries: entries.iter().map(|e| e.to_string()).collect(),
            ..Default::default()
        }
    }

    fn node_tree(manifest: &str) -> TreeSnapshot {
        TreeSnapshot {
            package_manifest: Some(manifest.to_string()),
            ..tree(&["package.json"])
        }
    }

    #[test]
    fn test_php_beats_node() {
        let mut snapshot = node_tree(r#"{"dependencies":{"react":"18"}}"#);
        snapshot.root_entries.insert("index.php".to_string());
        assert_eq!(classify(&snapshot), Framework::Php);

        snapshot.public_htaccess = true;
        assert_eq!(classify(&snapshot), Framework::Lamp);
    }

    #[test]
    fn test_node_precedence() {
        let mern = r#"{"dependencies":{"express":"4","mongoose":"7","react":"18","next":"13"}}"#;
        assert_eq!(classify(&node_tree(mern)), Framework::Mern);
        let next = r#"{"dependencies":{"next":"13","react":"18"}}"#;
        assert_eq!(classify(&node_tree(next)), Framework::NodeNext);
        let react = r#"{"dependencies":{"react":"18"},"devDependencies":{"vite":"4"}}"#;
        assert_eq!(classify(&node_tree(react)), Framework::NodeReact);
        let vue = r#"{"devDependencies":{"vue":"3"}}"#;
        assert_eq!(classify(&node_tree(vue)), Framework::NodeVue);
        assert_eq!(classify(&node_tree(r#"{"name":"api"}"#)), Framework::Node);
    }

    #[test]
    fn test_only_declared_packages_count() {
        let described = r#"{"name":"revue","description":"not next, no react","scripts":{"dev":"next dev"}}"#;
        assert_eq!(classify(&node_tree(described)), Framework::Node);
        let dev_stack = r#"{"dependencies":{"express":"4","mongoose":"7"},"devDependencies":{"react":"18"}}"#;
        assert_eq!(classify(&node_tree(dev_stack)), Framework::Mern);
    }

    #[test]
    fn test_broken_manifest_uses_text_search() {
        assert_eq!(classify(&node_tree(r#"{"dependencies": {"vue": "3",}"#)), Framework::NodeVue);
    }

    #[test]
    fn test_python() {
        assert_eq!(
            classify(&tree(&["requirements.txt", "manage.py", "app.py"])),
            Framework::PythonDjango
        );
        assert_eq!(classify(&tree(&["Pipfile", "server.py"])), Framework::PythonFlask);
        // dependency marker without any entrypoint falls through
        assert_eq!(
            classify(&tree(&["requirements.txt", "index.html"])),
            Framework::Static
        );
    }

    #[test]
    fn test_java_static_unknown() {
        assert_eq!(classify(&tree(&["pom.xml", "build.gradle"])), Framework::JavaMaven);
        assert_eq!(classify(&tree(&["build.gradle.kts"])), Framework::JavaGradle);
        assert_eq!(classify(&tree(&["index.html", "style.css"])), Framework::Static);
        assert_eq!(classify(&tree(&["README.md"])), Framework::Unknown);
        assert_eq!(classify(&tree(&[])), Framework::Unknown);
    }
}
