//! The capability binding set handed to one run.
//!
//! A [`BindingSet`] is the complete interface a script sees: the snapshot
//! values `dataset` and `filters`, followed by one function per bound
//! [`Callback`], passed as the parameters of the compiled script function.
//! Nothing else from the host is reachable.
//!
//! The set owns the snapshot it exposes, so the data a script reads and the
//! data `exportData` hands to the sink are always the same copy.

use std::collections::HashMap;
use std::fmt::Write as _;
use std::sync::Arc;

use serde::Serialize;
use serde_json::Value;

use crate::callback::Callback;
use crate::dataset::DatasetSnapshot;
use crate::output::OutputChannel;

/// Names of the value bindings, in parameter order.
pub const VALUE_BINDINGS: [&str; 2] = ["dataset", "filters"];

/// Whether a binding is a plain value or a callable.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum BindingKind {
    /// Data exposed to the script.
    Value,
    /// A host capability.
    Function,
}

/// Editor help for one binding.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BindingInfo {
    /// Name in the script scope.
    pub name: String,
    /// Value or function.
    pub kind: BindingKind,
    /// Human-readable description.
    pub description: String,
    /// JSON Schema of the value or of the positional arguments.
    pub schema: Value,
}

/// Per-run dispatch table of capabilities, closed over that run's output
/// and snapshot.
pub struct BindingSet {
    output: Arc<OutputChannel>,
    snapshot: Arc<DatasetSnapshot>,
    callbacks: Vec<Arc<dyn Callback>>,
}

impl std::fmt::Debug for BindingSet {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BindingSet")
            .field("parameters", &self.parameter_names())
            .field("output", &self.output)
            .field("records", &self.snapshot.record_count())
            .finish()
    }
}

impl BindingSet {
    /// An empty set exposing `snapshot` and writing to `output`.
    #[must_use]
    pub fn new(output: Arc<OutputChannel>, snapshot: Arc<DatasetSnapshot>) -> Self {
        Self {
            output,
            snapshot,
            callbacks: Vec::new(),
        }
    }

    /// Bind a callback under its own name. A callback with the same name is
    /// replaced in place, keeping its parameter position.
    #[must_use]
    pub fn with_callback(mut self, callback: Arc<dyn Callback>) -> Self {
        match self
            .callbacks
            .iter()
            .position(|existing| existing.name() == callback.name())
        {
            Some(index) => self.callbacks[index] = callback,
            None => self.callbacks.push(callback),
        }
        self
    }

    /// The run's output channel.
    #[must_use]
    pub fn output(&self) -> &Arc<OutputChannel> {
        &self.output
    }

    /// The snapshot behind `dataset` and `filters`.
    #[must_use]
    pub fn snapshot(&self) -> &Arc<DatasetSnapshot> {
        &self.snapshot
    }

    /// Parameter list of the compiled script function, in order.
    #[must_use]
    pub fn parameter_names(&self) -> Vec<String> {
        VALUE_BINDINGS
            .iter()
            .map(ToString::to_string)
            .chain(self.callbacks.iter().map(|c| c.name().to_string()))
            .collect()
    }

    /// Every binding with its description and schema, in parameter order.
    #[must_use]
    pub fn describe(&self) -> Vec<BindingInfo> {
        let values = [
            BindingInfo {
                name: "dataset".to_string(),
                kind: BindingKind::Value,
                description: "Point-in-time copy of every channel's records: shopify, meta, google, klaviyo, ga4.".to_string(),
                schema: serde_json::json!({
                    "type": "object",
                    "properties": {
                        "shopify": { "type": "array", "items": { "type": "object" } },
                        "meta": { "type": "array", "items": { "type": "object" } },
                        "google": { "type": "array", "items": { "type": "object" } },
                        "klaviyo": { "type": "array", "items": { "type": "object" } },
                        "ga4": { "type": "array", "items": { "type": "object" } },
                    },
                }),
            },
            BindingInfo {
                name: "filters".to_string(),
                kind: BindingKind::Value,
                description: "Filter state the dataset was selected under.".to_string(),
                schema: serde_json::json!({ "type": "object" }),
            },
        ];
        values
            .into_iter()
            .chain(self.callbacks.iter().map(|callback| BindingInfo {
                name: callback.name().to_string(),
                kind: BindingKind::Function,
                description: callback.description().to_string(),
                schema: callback.parameters_schema(),
            }))
            .collect()
    }

    pub(crate) fn callback_map(&self) -> HashMap<String, Arc<dyn Callback>> {
        self.callbacks
            .iter()
            .map(|c| (c.name().to_string(), Arc::clone(c)))
            .collect()
    }

    /// Source that compiles `code` into the entry function without running it.
    pub(crate) fn entry_source(&self, code: &str) -> Result<String, serde_json::Error> {
        let mut args = Vec::with_capacity(VALUE_BINDINGS.len() + self.callbacks.len() + 1);
        for name in self.parameter_names() {
            args.push(serde_json::to_string(&name)?);
        }
        args.push(serde_json::to_string(code)?);
        Ok(format!("new Function({})", args.join(", ")))
    }

    /// Source of the binding factory.
    ///
    /// Evaluates to a function taking the native host function. Calling it
    /// materializes fresh `dataset` and `filters` objects plus one wrapper per
    /// callback, and returns a runner that applies an entry function to them.
    pub(crate) fn factory_source(&self) -> Result<String, serde_json::Error> {
        let snapshot = &self.snapshot;
        let dataset = serde_json::to_string(&serde_json::to_string(&snapshot.to_script_value())?)?;
        let filters = serde_json::to_string(&serde_json::to_string(&snapshot.filters)?)?;

        let mut bindings = format!("parse({dataset}),\n    parse({filters})");
        for callback in &self.callbacks {
            let (encode, lenient) = if callback.text_arguments() {
                ("asText", true)
            } else {
                ("asJson", false)
            };
            let name = serde_json::to_string(callback.name())?;
            let _ = write!(bindings, ",\n    bind({name}, {encode}, {lenient})");
        }

        Ok(format!("{FACTORY_HEAD}  var bindings = [\n    {bindings}\n  ];\n{FACTORY_TAIL}"))
    }
}

const FACTORY_HEAD: &str = r#"(function (host) {
  var stringify = JSON.stringify;
  var parse = JSON.parse;
  var text = String;
  var finite = isFinite;
  function asText(value) {
    var kind = typeof value;
    if (kind === "undefined" || kind === "function" || kind === "symbol" ||
        kind === "bigint" || (kind === "number" && !finite(value))) {
      return text(value);
    }
    return value;
  }
  function asJson(value) {
    return value === undefined ? null : value;
  }
  function tolerant(args) {
    var seen = [];
    return stringify(args, function (key, value) {
      if (typeof value === "bigint") {
        return text(value);
      }
      if (typeof value === "object" && value !== null) {
        for (var i = 0; i < seen.length; i++) {
          if (seen[i] === value) {
            return "[Circular]";
          }
        }
        seen[seen.length] = value;
      }
      return value;
    });
  }
  function each(args) {
    var out = [];
    for (var i = 0; i < args.length; i++) {
      try {
        out[i] = text(args[i]);
      } catch (e) {
        out[i] = "[unprintable]";
      }
    }
    return stringify(out);
  }
  function encodeAll(args, lenient) {
    try {
      return stringify(args);
    } catch (e) {
      if (!lenient) {
        throw e;
      }
    }
    try {
      return tolerant(args);
    } catch (e) {
      return each(args);
    }
  }
  function bind(name, encode, lenient) {
    return function () {
      var args = [];
      for (var i = 0; i < arguments.length; i++) {
        args[i] = encode(arguments[i]);
      }
      var result = parse(host(name, encodeAll(args, lenient)));
      return result === null ? undefined : result;
    };
  }
"#;

const FACTORY_TAIL: &str = r"  return function (entry) {
    return entry.apply(undefined, bindings);
  };
})";
