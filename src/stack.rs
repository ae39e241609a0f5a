use crate::contours::Contour;
use crate::stack::functions::{Function, Image, Input, Output, Values};
use crate::stack::params::{Param, ParamValue};
use crate::Errors;
use anyhow::{Context, Result};
use image::RgbImage;
use itertools::Itertools;
use log::debug;
use once_cell::sync::Lazy;
use pathfinding::prelude::{bfs_reach, topological_sort};
use std::collections::{BTreeMap, HashMap, HashSet};

/// Image functions the stages are built from
pub mod functions;

/// Typed stage parameters
pub mod params;

/// Graph node carrying the current frame
pub const INPUT: &str = "INPUT";
/// Graph node naming the stage whose image is the stack's image output
pub const IMAGE: &str = "IMAGE";
/// Graph node naming the stage whose contours are the stack's data output
pub const DATA: &str = "DATA";

pub const DEFAULT_MODULE: &str = "threshold";

/// Values of every stage, `stage -> parameter -> value`
pub type StackValues = BTreeMap<String, Values>;

/// Static description of a stack: its stages and the sources each one reads
///
#[derive(Debug, Clone)]
pub struct Blueprint {
    pub name: &'static str,
    pub title: &'static str,
    pub stages: Vec<(&'static str, Function)>,
    pub graph: Vec<(&'static str, Vec<&'static str>)>,
}

static MODULES: Lazy<Vec<Blueprint>> = Lazy::new(|| {
    vec![
        Blueprint {
            name: "threshold",
            title: "Adaptive Threshold",
            stages: vec![
                ("convert_colour", Function::ConvertColour),
                ("gaussian_blur", Function::GaussianBlur),
                ("adaptive_threshold", Function::AdaptiveThreshold),
                ("morphology", Function::Morphology),
                ("contour_extract", Function::ExtractContours),
                ("size_filter", Function::SizeFilter),
                ("draw_contours", Function::DrawContours),
            ],
            graph: vec![
                (IMAGE, vec!["draw_contours"]),
                (DATA, vec!["size_filter"]),
                ("draw_contours", vec![INPUT, "size_filter"]),
                ("size_filter", vec!["contour_extract"]),
                ("contour_extract", vec!["morphology"]),
                ("morphology", vec!["adaptive_threshold"]),
                ("adaptive_threshold", vec!["gaussian_blur"]),
                ("gaussian_blur", vec!["convert_colour"]),
                ("convert_colour", vec![INPUT]),
            ],
        },
        Blueprint {
            name: "short",
            title: "Threshold (image only)",
            stages: vec![
                ("convert_colour", Function::ConvertColour),
                ("gaussian_blur", Function::GaussianBlur),
                ("adaptive_threshold", Function::AdaptiveThreshold),
                ("morphology", Function::Morphology),
            ],
            graph: vec![
                (IMAGE, vec!["morphology"]),
                ("morphology", vec!["adaptive_threshold"]),
                ("adaptive_threshold", vec!["gaussian_blur"]),
                ("gaussian_blur", vec!["convert_colour"]),
                ("convert_colour", vec![INPUT]),
            ],
        },
        Blueprint {
            name: "simple",
            title: "Simplified Threshold",
            stages: vec![
                ("preprocessing", Function::Preprocessing),
                ("adaptive_threshold", Function::AdaptiveThreshold),
                ("postprocessing", Function::Postprocessing),
            ],
            graph: vec![
                (IMAGE, vec!["postprocessing"]),
                (DATA, vec!["postprocessing"]),
                ("postprocessing", vec!["adaptive_threshold"]),
                ("adaptive_threshold", vec!["preprocessing"]),
                ("preprocessing", vec![INPUT]),
            ],
        },
        Blueprint {
            name: "null",
            title: "No Segmentation",
            stages: vec![],
            graph: vec![(IMAGE, vec![INPUT])],
        },
    ]
});

/// Names and titles of the available stacks
///
pub fn modules() -> Vec<(&'static str, &'static str)> {
    MODULES.iter().map(|b| (b.name, b.title)).collect()
}

pub fn blueprint(name: &str) -> Result<&'static Blueprint> {
    MODULES
        .iter()
        .find(|b| b.name == name)
        .ok_or_else(|| Errors::UnknownModule(name.to_string()).into())
}

/// One stage of a stack with its values and last output
///
#[derive(Debug, Clone)]
pub struct Stage {
    function: Function,
    sources: Vec<String>,
    values: Values,
    output: Option<Output>,
    runs: usize,
}

impl Stage {
    pub fn function(&self) -> Function {
        self.function
    }

    pub fn sources(&self) -> &[String] {
        &self.sources
    }

    pub fn values(&self) -> &Values {
        &self.values
    }

    pub fn output(&self) -> Option<&Output> {
        self.output.as_ref()
    }

    /// How many times the stage was computed
    pub fn runs(&self) -> usize {
        self.runs
    }
}

/// Segmentation stack: named stages evaluated in dependency order
///
/// Outputs of every stage are kept between evaluations, only stages whose inputs or
/// values changed are recomputed.
///
#[derive(Debug, Clone)]
pub struct Stack {
    module: String,
    stages: BTreeMap<String, Stage>,
    order: Vec<String>,
    dependents: HashMap<String, Vec<String>>,
    image: Option<String>,
    data: Option<String>,
    input: Option<Output>,
    stale: HashSet<String>,
    view: Option<String>,
}

impl Stack {
    /// Builds one of the registered stacks
    ///
    pub fn new(module: &str) -> Result<Self> {
        let b = blueprint(module)?;
        Self::build(b.name, &b.stages, &b.graph)
    }

    /// Builds a stack from stages and a dependency graph
    ///
    /// # Parameters
    /// * `module` - name reported by the stack
    /// * `stages` - stage names with their functions
    /// * `graph` - for every node the nodes it reads from; `IMAGE` and `DATA` name the stage
    ///   providing the respective output, `INPUT` is the current frame
    ///
    pub fn build(
        module: &str,
        stages: &[(&str, Function)],
        graph: &[(&str, Vec<&str>)],
    ) -> Result<Self> {
        let mut built = stages
            .iter()
            .map(|(name, function)| {
                (
                    name.to_string(),
                    Stage {
                        function: *function,
                        sources: Vec::default(),
                        values: function.defaults(),
                        output: None,
                        runs: 0,
                    },
                )
            })
            .collect::<BTreeMap<_, _>>();

        let known = |n: &str| n == INPUT || built.contains_key(n);
        let mut image = None;
        let mut data = None;
        let mut edges: Vec<(String, Vec<String>)> = Vec::default();
        for (node, sources) in graph {
            if let Some(s) = sources.iter().find(|s| !known(**s)) {
                return Err(Errors::UnknownStage(s.to_string()).into());
            }
            match *node {
                IMAGE | DATA => {
                    let [source] = sources.as_slice() else {
                        return Err(Errors::InvalidParam(
                            node.to_string(),
                            format!("expected exactly one source, got {:?}", sources),
                        )
                        .into());
                    };
                    let slot = if *node == IMAGE { &mut image } else { &mut data };
                    *slot = Some(source.to_string());
                }
                _ if built.contains_key(*node) => {
                    edges.push((node.to_string(), sources.iter().map(|s| s.to_string()).collect()))
                }
                _ => return Err(Errors::UnknownStage(node.to_string()).into()),
            }
        }
        for (node, sources) in edges {
            if let Some(stage) = built.get_mut(&node) {
                stage.sources = sources;
            }
        }

        let mut dependents: HashMap<String, Vec<String>> = HashMap::default();
        for (name, stage) in &built {
            for s in &stage.sources {
                dependents.entry(s.clone()).or_default().push(name.clone());
            }
        }

        let roots = std::iter::once(INPUT.to_string())
            .chain(built.keys().cloned())
            .collect::<Vec<_>>();
        let order = topological_sort(&roots, |n| {
            dependents.get(n).cloned().unwrap_or_default()
        })
        .map_err(Errors::CyclicGraph)?
        .into_iter()
        .filter(|n| n != INPUT)
        .collect::<Vec<_>>();

        debug!("Stack `{}` evaluates {}", module, order.iter().join(" → "));
        let stale = built.keys().cloned().collect();
        Ok(Self {
            module: module.to_string(),
            stages: built,
            order,
            dependents,
            image,
            data,
            input: None,
            stale,
            view: None,
        })
    }

    pub fn module(&self) -> &str {
        &self.module
    }

    /// Stage names in evaluation order
    pub fn stage_names(&self) -> &[String] {
        &self.order
    }

    pub fn stage(&self, name: &str) -> Result<&Stage> {
        self.stages
            .get(name)
            .ok_or_else(|| Errors::UnknownStage(name.to_string()).into())
    }

    pub fn params(&self, stage: &str) -> Result<Vec<(&'static str, Param)>> {
        Ok(self.stage(stage)?.function.params())
    }

    pub fn value(&self, stage: &str, param: &str) -> Result<&ParamValue> {
        self.stage(stage)?
            .values
            .get(param)
            .ok_or_else(|| Errors::UnknownParam(stage.to_string(), param.to_string()).into())
    }

    fn checked(&self, stage: &str, param: &str, value: &ParamValue) -> Result<ParamValue> {
        let declared = self
            .params(stage)?
            .into_iter()
            .find(|(name, _)| *name == param)
            .map(|(_, p)| p)
            .ok_or_else(|| Errors::UnknownParam(stage.to_string(), param.to_string()))?;
        declared.validate(value)
    }

    /// Sets one parameter; the stage and everything downstream of it become stale
    ///
    pub fn set_value(&mut self, stage: &str, param: &str, value: ParamValue) -> Result<()> {
        let value = self.checked(stage, param, &value)?;
        let current = self.value(stage, param)?;
        if *current == value {
            return Ok(());
        }
        if let Some(s) = self.stages.get_mut(stage) {
            s.values.insert(param.to_string(), value);
        }
        self.invalidate(stage);
        Ok(())
    }

    /// Every stage value, `stage -> parameter -> value`
    pub fn values(&self) -> StackValues {
        self.stages
            .iter()
            .map(|(name, s)| (name.clone(), s.values.clone()))
            .collect()
    }

    /// Imports values; nothing changes unless every value is valid
    ///
    pub fn set_values(&mut self, values: &StackValues) -> Result<()> {
        let mut checked = Vec::default();
        for (stage, params) in values {
            for (param, value) in params {
                checked.push((stage.as_str(), param.as_str(), self.checked(stage, param, value)?));
            }
        }
        for (stage, param, value) in checked {
            self.set_value(stage, param, value)?;
        }
        Ok(())
    }

    fn invalidate(&mut self, stage: &str) {
        let reached = bfs_reach(stage.to_string(), |n| {
            self.dependents.get(n).cloned().unwrap_or_default()
        })
        .collect::<Vec<_>>();
        self.stale.extend(reached);
    }

    pub fn is_stale(&self, stage: &str) -> bool {
        self.stale.contains(stage)
    }

    /// Loads a new frame, every stage becomes stale
    ///
    pub fn set_input(&mut self, frame: RgbImage) {
        self.input = Some(Output::image(Image::Rgb(frame)));
        self.stale.extend(self.stages.keys().cloned());
    }

    pub fn input(&self) -> Option<&Image> {
        self.input.as_ref().and_then(|i| i.image.as_ref())
    }

    fn node(&self, name: &str) -> Option<&Output> {
        if name == INPUT {
            self.input.as_ref()
        } else {
            self.stages.get(name).and_then(|s| s.output.as_ref())
        }
    }

    fn gather(&self, sources: &[String]) -> Input<'_> {
        let outputs = sources.iter().filter_map(|s| self.node(s)).collect::<Vec<_>>();
        Input {
            image: outputs.iter().find_map(|o| o.image.as_ref()),
            contours: outputs.iter().find_map(|o| o.contours.as_deref()),
        }
    }

    /// Recomputes stale stages in dependency order
    ///
    pub fn evaluate(&mut self) -> Result<()> {
        for name in self.order.clone() {
            if !self.stale.contains(&name) {
                continue;
            }
            let output = {
                let stage = self.stage(&name)?;
                let input = self.gather(&stage.sources);
                stage
                    .function
                    .apply(&name, input, &stage.values)
                    .with_context(|| format!("Stage `{}` failed", name))?
            };
            debug!("Recomputed stage `{}`", name);
            if let Some(stage) = self.stages.get_mut(&name) {
                stage.output = Some(output);
                stage.runs += 1;
            }
            self.stale.remove(&name);
        }
        Ok(())
    }

    /// Loads `frame` and evaluates the stack
    pub fn process(&mut self, frame: RgbImage) -> Result<()> {
        self.set_input(frame);
        self.evaluate()
    }

    /// Last output of a stage
    pub fn output(&self, stage: &str) -> Result<Option<&Output>> {
        Ok(self.stage(stage)?.output.as_ref())
    }

    /// The stack's image output
    pub fn image(&self) -> Option<&Image> {
        self.image
            .as_deref()
            .and_then(|n| self.node(n))
            .and_then(|o| o.image.as_ref())
    }

    /// The stack's contour output, empty for stacks without data
    pub fn contours(&self) -> &[Contour] {
        self.data
            .as_deref()
            .and_then(|n| self.node(n))
            .and_then(|o| o.contours.as_deref())
            .unwrap_or_default()
    }

    /// Selects the stage whose image is shown, `None` selects the image output
    ///
    pub fn set_view(&mut self, stage: Option<&str>) -> Result<()> {
        if let Some(s) = stage {
            self.stage(s)?;
        }
        self.view = stage.map(str::to_string);
        Ok(())
    }

    pub fn view(&self) -> Option<&str> {
        self.view.as_deref()
    }

    /// Image of the selected view
    pub fn view_image(&self) -> Option<&Image> {
        match &self.view {
            Some(stage) => self.node(stage).and_then(|o| o.image.as_ref()),
            None => self.image(),
        }
    }
}
