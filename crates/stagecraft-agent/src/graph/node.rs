use std::fmt;

use crate::stage::Stage;

/// A stage registered in a graph under a unique name.
///
/// The node name is the graph's identity for the stage; `Stage::name` is only
/// used for the stage's own logging.
pub struct Node {
    pub name: String,
    pub stage: Box<dyn Stage>,
}

impl Node {
    pub fn new(name: impl Into<String>, stage: impl Stage + 'static) -> Self {
        Self {
            name: name.into(),
            stage: Box::new(stage),
        }
    }

    pub fn input_keys(&self) -> &[String] {
        self.stage.input_keys()
    }

    pub fn output_keys(&self) -> &[String] {
        self.stage.output_keys()
    }
}

impl fmt::Debug for Node {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Node")
            .field("name", &self.name)
            .field("stage", &self.stage.name())
            .field("input_keys", &self.input_keys())
            .field("output_keys", &self.output_keys())
            .finish()
    }
}
