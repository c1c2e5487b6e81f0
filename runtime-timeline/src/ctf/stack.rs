//! Stack frame dictionary of CPU profile responses

use super::RawId;
use serde::{
    de::{MapAccess, Visitor},
    Deserialize, Deserializer,
};
use std::{
    fmt::{self, Formatter},
    ops::Deref,
};

/// Stack frame identifier
///
/// Samples may reference frames with integers, but dictionary keys are always
/// strings, so both are stored as strings.
#[derive(Clone, Debug, Default, Deserialize, Eq, Hash, PartialEq)]
#[serde(from = "RawId")]
pub struct StackFrameId(pub Box<str>);
//
impl From<RawId> for StackFrameId {
    fn from(i: RawId) -> Self {
        Self(i.into())
    }
}
//
impl From<&str> for StackFrameId {
    fn from(s: &str) -> Self {
        Self(s.into())
    }
}
//
impl fmt::Display for StackFrameId {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Stack frame object
#[derive(Clone, Debug, Default, Deserialize, PartialEq)]
pub struct StackFrame {
    /// Usually a DSO, library or "Dart"
    #[serde(default)]
    pub category: Box<str>,

    /// Symbol name or address
    pub name: Box<str>,

    /// Parent stack frame, if not at the root of the stack
    pub parent: Option<StackFrameId>,
}

/// Dictionary of stack frames, in the order in which they were declared
///
/// Declaration order matters because it decides the order of siblings in
/// call trees, so this cannot be a plain hash map.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct StackFrameTable(Box<[(StackFrameId, StackFrame)]>);
//
impl StackFrameTable {
    /// Build from (id, frame) pairs in declaration order
    pub fn new(frames: impl IntoIterator<Item = (StackFrameId, StackFrame)>) -> Self {
        Self(frames.into_iter().collect())
    }
}
//
impl Deref for StackFrameTable {
    type Target = [(StackFrameId, StackFrame)];

    fn deref(&self) -> &Self::Target {
        &self.0
    }
}
//
impl<'de> Deserialize<'de> for StackFrameTable {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        deserializer.deserialize_map(StackFrameTableVisitor)
    }
}
//
struct StackFrameTableVisitor;
//
impl<'de> Visitor<'de> for StackFrameTableVisitor {
    type Value = StackFrameTable;

    fn expecting(&self, formatter: &mut Formatter) -> fmt::Result {
        formatter.write_str("a map from stack frame ids to stack frames")
    }

    fn visit_map<A: MapAccess<'de>>(self, mut map: A) -> Result<Self::Value, A::Error> {
        // MapAccess yields entries in document order
        let mut frames = Vec::with_capacity(map.size_hint().unwrap_or(0));
        while let Some((id, frame)) = map.next_entry::<Box<str>, StackFrame>()? {
            frames.push((StackFrameId(id), frame));
        }
        Ok(StackFrameTable(frames.into_boxed_slice()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use serde_json as json;

    #[test]
    fn declaration_order() {
        let table = json::from_str::<StackFrameTable>(
            r#"{
    "z": { "name": "main", "category": "Dart" },
    "a": { "parent": "z", "name": "SomeFunction", "category": "Dart" },
    "3": { "parent": "z", "name": "[Native] 0x1234" }
}"#,
        )
        .expect("Deserialization should succeed");
        assert_eq!(
            table,
            StackFrameTable::new([
                (
                    "z".into(),
                    StackFrame {
                        category: "Dart".into(),
                        name: "main".into(),
                        parent: None,
                    }
                ),
                (
                    "a".into(),
                    StackFrame {
                        category: "Dart".into(),
                        name: "SomeFunction".into(),
                        parent: Some("z".into()),
                    }
                ),
                (
                    "3".into(),
                    StackFrame {
                        category: "".into(),
                        name: "[Native] 0x1234".into(),
                        parent: Some("z".into()),
                    }
                ),
            ])
        );
    }

    #[test]
    fn integer_ids() {
        let frame = json::from_str::<StackFrame>(r#"{ "name": "f", "parent": 42 }"#)
            .expect("Deserialization should succeed");
        assert_eq!(frame.parent, Some(StackFrameId("42".into())));
    }
}
