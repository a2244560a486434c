//! Integration tests for running scripts through the sandbox.

#![allow(clippy::unwrap_used, clippy::expect_used)]

use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use dashscript::{
    Channel, DatasetSnapshot, DirectoryExport, Error, ExecuteResult, ExportError, ExportFormat,
    ExportReceipt, ExportSink, InMemoryDataset, OutputHandler, ResourceLimits, Sandbox,
    ScriptErrorKind, Severity, SnapshotProvider,
};
use serde_json::json;

fn sample() -> DatasetSnapshot {
    DatasetSnapshot::new()
        .with_channel(
            Channel::Shopify,
            vec![
                json!({"date": "2024-03-01", "revenue": 1000, "orders": 10, "aov": 100}),
                json!({"date": "2024-03-02", "revenue": 1250.5, "orders": 12, "aov": 104.2}),
            ],
        )
        .with_channel(Channel::Meta, vec![json!({"spend": 300, "conversionValue": 900})])
        .with_filters(json!({"range": "30d"}))
}

async fn run(sandbox: &Sandbox, code: &str) -> ExecuteResult {
    sandbox.execute(code, &sample()).await.expect("engine failure")
}

#[tokio::test]
async fn log_hello() {
    let sandbox = Sandbox::builder().build().unwrap();
    let result = run(&sandbox, r#"log("hello")"#).await;
    assert_eq!(result.log_lines, vec!["hello"]);
    assert!(result.is_success());
    assert_eq!(result.stats.callback_invocations, 1);
}

#[tokio::test]
async fn thrown_error_keeps_partial_output() {
    let sandbox = Sandbox::builder().build().unwrap();
    let result = run(&sandbox, r#"log("x"); throw new Error("boom")"#).await;
    assert_eq!(result.log_lines, vec!["x"]);
    let error = result.error.as_ref().unwrap();
    assert_eq!(error.kind, ScriptErrorKind::Runtime);
    assert_eq!(error.message, "boom");
    assert!(result.error_trace().is_some());
    assert!(result.render().starts_with("x\nError: boom"));
}

#[tokio::test]
async fn add_widget_registers_and_echoes() {
    let sandbox = Sandbox::builder().build().unwrap();
    let result = run(
        &sandbox,
        r#"const id = addWidget({title:"T", type:"bar", data:[{a:1}], dataKeys:["a"]});
           log(typeof id, id.startsWith("widget-"));"#,
    )
    .await;

    assert!(result.is_success(), "{:?}", result.error);
    assert_eq!(result.log_lines, vec!["[Widget Added] T", "string true"]);
    let widgets = sandbox.widgets().list();
    assert_eq!(widgets.len(), 1);
    assert_eq!(widgets[0].title, "T");
    assert_eq!(widgets[0].data, vec![json!({"a": 1})]);
}

#[tokio::test]
async fn add_insight_stamps_time_and_flags() {
    let sandbox = Sandbox::builder().build().unwrap();
    let before = Utc::now();
    let result = run(
        &sandbox,
        r#"addInsight({severity:"warning", title:"Drop", body:"Revenue fell"})"#,
    )
    .await;
    let after = Utc::now();

    assert_eq!(result.log_lines, vec!["[Insight Added] Drop"]);
    let insights = sandbox.insights().list();
    assert_eq!(insights.len(), 1);
    let insight = &insights[0];
    assert_eq!(insight.severity, Severity::Warning);
    assert!(!insight.dismissed && !insight.snoozed && !insight.bookmarked);
    assert!(insight.timestamp >= before && insight.timestamp <= after);
}

#[tokio::test]
async fn widget_ids_unique_across_runs() {
    let sandbox = Sandbox::builder().build().unwrap();
    let code = r#"for (let i = 0; i < 5; i++) {
        addWidget({id: "fixed", title: "W" + i, type: "line", data: [], dataKeys: []});
    }"#;
    run(&sandbox, code).await;
    run(&sandbox, code).await;

    let mut ids: Vec<String> = sandbox.widgets().list().into_iter().map(|w| w.id).collect();
    assert_eq!(ids.len(), 10);
    assert!(ids.iter().all(|id| id != "fixed"));
    ids.sort();
    ids.dedup();
    assert_eq!(ids.len(), 10);
}

#[tokio::test]
async fn each_emission_echoes_exactly_once() {
    let sandbox = Sandbox::builder().build().unwrap();
    let result = run(
        &sandbox,
        r#"addWidget({title:"A", type:"pie", data:[], dataKeys:[]});
           addInsight({title:"B", body:""});
           addMetric({name:"C", value: 2, format:"percent"});"#,
    )
    .await;
    assert_eq!(
        result.log_lines,
        vec!["[Widget Added] A", "[Insight Added] B", "[Metric Added] C"]
    );
    assert_eq!(sandbox.insights().list()[0].severity, Severity::Info);
    assert_eq!(sandbox.metrics().len(), 1);
}

#[tokio::test]
async fn dataset_mutation_never_reaches_provider() {
    let provider = InMemoryDataset::new(sample());
    let sandbox = Sandbox::builder().build().unwrap();
    let code = r#"log(dataset.shopify.length, dataset.shopify[0].revenue);
                  dataset.shopify[0].revenue = 999;
                  dataset.shopify.push({revenue: 1});
                  filters.range = "changed";"#;

    let first = sandbox.execute(code, &provider.snapshot()).await.unwrap();
    let second = sandbox.execute(code, &provider.snapshot()).await.unwrap();

    assert_eq!(first.log_lines, vec!["2 1000"]);
    assert_eq!(second.log_lines, vec!["2 1000"]);
    let live = provider.snapshot();
    assert_eq!(live.records(Channel::Shopify)[0]["revenue"], json!(1000));
    assert_eq!(live.filters, json!({"range": "30d"}));
}

#[tokio::test]
async fn bindings_are_the_whole_interface() {
    let sandbox = Sandbox::builder().build().unwrap();
    let result = run(
        &sandbox,
        r#"log(Object.keys(dataset).sort().join(","));
           log(typeof console, typeof require, typeof process, typeof fetch);
           log(typeof host, typeof networkCall);
           log(filters.range);"#,
    )
    .await;
    assert_eq!(
        result.log_lines,
        vec![
            "ga4,google,klaviyo,meta,shopify",
            "undefined undefined undefined undefined",
            "undefined function",
            "30d",
        ]
    );
}

#[tokio::test]
async fn log_formats_values() {
    let sandbox = Sandbox::builder().build().unwrap();
    let result = run(
        &sandbox,
        r#"log("Today Revenue:", 1250.5);
           log(undefined, null, true, NaN);
           log({a: [1, 2]});
           log();"#,
    )
    .await;
    assert_eq!(
        result.log_lines,
        vec![
            "Today Revenue: 1250.5",
            "undefined null true NaN",
            "{\n  \"a\": [\n    1,\n    2\n  ]\n}",
            "",
        ]
    );
}

#[tokio::test]
async fn syntax_error_is_compile_error() {
    let sandbox = Sandbox::builder().build().unwrap();
    let result = run(&sandbox, r#"log("a""#).await;
    let error = result.error.unwrap();
    assert_eq!(error.kind, ScriptErrorKind::Compile);
    assert!(!error.message.is_empty());
    assert!(result.log_lines.is_empty());
}

#[tokio::test]
async fn invalid_descriptor_is_catchable_type_error() {
    let sandbox = Sandbox::builder().build().unwrap();
    let result = run(
        &sandbox,
        r#"try {
             addWidget({title: "T", type: "scatter", data: [], dataKeys: []});
           } catch (e) {
             log(e instanceof TypeError, e.message.includes("scatter"));
           }"#,
    )
    .await;
    assert!(result.is_success(), "{:?}", result.error);
    assert_eq!(result.log_lines, vec!["true true"]);
    assert!(sandbox.widgets().is_empty());
}

#[tokio::test]
async fn uncaught_validation_error_ends_run() {
    let sandbox = Sandbox::builder().build().unwrap();
    let result = run(
        &sandbox,
        r#"log("before"); addWidget({type: "bar", data: [], dataKeys: []}); log("after");"#,
    )
    .await;
    assert_eq!(result.log_lines, vec!["before"]);
    assert!(result.error_message().unwrap().contains("title"));
}

#[tokio::test]
async fn network_is_disabled_by_default() {
    let sandbox = Sandbox::builder().build().unwrap();
    let result = run(
        &sandbox,
        r#"try { networkCall("https://example.com"); } catch (e) { log(e.message); }"#,
    )
    .await;
    assert!(result.log_lines[0].contains("network access is disabled"));
}

#[tokio::test]
async fn export_data_writes_through_sink() {
    let tmp = tempfile::tempdir().unwrap();
    let sandbox = Sandbox::builder()
        .with_export_sink(DirectoryExport::new(tmp.path()))
        .build()
        .unwrap();
    let result = run(&sandbox, r#"exportData("csv")"#).await;

    assert_eq!(result.log_lines, vec!["[Export] Data exported as CSV"]);
    let dirs: Vec<_> = std::fs::read_dir(tmp.path()).unwrap().collect();
    assert_eq!(dirs.len(), 1);
    let dir = dirs.into_iter().next().unwrap().unwrap().path();
    assert!(dir.join("shopify.csv").exists());
    assert!(dir.join("meta.csv").exists());
}

#[tokio::test]
async fn callback_budget_caps_capabilities_but_not_log() {
    let sandbox = Sandbox::builder()
        .with_resource_limits(ResourceLimits {
            max_callback_invocations: Some(2),
            ..ResourceLimits::default()
        })
        .build()
        .unwrap();
    let result = run(
        &sandbox,
        r#"const w = {title: "W", type: "bar", data: [], dataKeys: []};
           for (let i = 0; i < 5; i++) { log(i); }
           addWidget(w);
           addWidget(w);
           try { networkCall("https://example.com"); } catch (e) { log("network:", e.message); }
           try { addWidget(w); } catch (e) { log("widget:", e.message); }
           log("done");"#,
    )
    .await;

    assert!(result.is_success(), "{:?}", result.error);
    assert_eq!(&result.log_lines[..5], &["0", "1", "2", "3", "4"]);
    assert_eq!(result.log_lines[5], "[Widget Added] W");
    assert_eq!(result.log_lines[6], "[Widget Added] W");
    assert!(result.log_lines[7].starts_with("network: callback limit exceeded"));
    assert!(result.log_lines[8].starts_with("widget: callback limit exceeded"));
    assert_eq!(result.log_lines[9], "done");
    assert_eq!(sandbox.widgets().len(), 2);
}

#[tokio::test]
async fn logging_outlasts_the_default_budget() {
    let sandbox = Sandbox::builder().build().unwrap();
    let result = run(&sandbox, "for (let i = 0; i < 1500; i++) { log(i); }").await;
    assert!(result.is_success(), "{:?}", result.error);
    assert_eq!(result.log_lines.len(), 1500);
    assert_eq!(result.log_lines[1499], "1499");
}

#[tokio::test]
async fn loop_limit_stops_busy_loops() {
    let sandbox = Sandbox::builder()
        .with_resource_limits(ResourceLimits {
            max_loop_iterations: 1_000,
            ..ResourceLimits::default()
        })
        .build()
        .unwrap();
    let result = run(&sandbox, r#"log("start"); while (true) {}"#).await;
    assert_eq!(result.log_lines, vec!["start"]);
    assert_eq!(result.error.unwrap().kind, ScriptErrorKind::Runtime);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn timeout_preserves_partial_output() {
    let sandbox = Sandbox::builder()
        .with_resource_limits(ResourceLimits {
            execution_timeout: Some(Duration::from_millis(200)),
            max_callback_invocations: None,
            ..ResourceLimits::default()
        })
        .build()
        .unwrap();
    let result = run(&sandbox, r#"while (true) { log("tick"); }"#).await;

    let error = result.error.as_ref().unwrap();
    assert_eq!(error.kind, ScriptErrorKind::Timeout);
    assert!(error.message.contains("timed out"));
    assert!(!result.log_lines.is_empty());
    assert!(result.log_lines.iter().all(|line| line == "tick"));
    assert!(result.stats.duration >= Duration::from_millis(200));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn runaway_runs_block_new_runs_until_they_finish() {
    let sandbox = Sandbox::builder()
        .with_resource_limits(ResourceLimits {
            execution_timeout: Some(Duration::from_millis(1)),
            ..ResourceLimits::default()
        })
        .build()
        .unwrap();
    let busy = "for (let j = 0; j < 20; j++) { for (let i = 0; i < 100000; i++) {} }";

    let result = run(&sandbox, busy).await;
    assert_eq!(result.error.unwrap().kind, ScriptErrorKind::Timeout);
    assert_eq!(sandbox.abandoned_runs(), 1);

    let err = sandbox.execute(busy, &sample()).await.unwrap_err();
    assert!(matches!(err, Error::Saturated(1)));

    let deadline = std::time::Instant::now() + Duration::from_secs(120);
    while sandbox.abandoned_runs() > 0 {
        assert!(std::time::Instant::now() < deadline, "runaway thread never finished");
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    assert!(sandbox.execute(r#"log("again")"#, &sample()).await.is_ok());
}

#[tokio::test]
async fn unserializable_log_arguments_still_print() {
    let sandbox = Sandbox::builder().build().unwrap();
    let result = run(
        &sandbox,
        r#"const o = {a: 1};
           o.self = o;
           log(o);
           log({n: 1n});
           log("after");"#,
    )
    .await;

    assert!(result.is_success(), "{:?}", result.error);
    assert_eq!(result.log_lines.len(), 3);
    assert!(result.log_lines[0].contains("[Circular]"));
    assert!(result.log_lines[1].contains('1'));
    assert_eq!(result.log_lines[2], "after");
}

#[tokio::test]
async fn unserializable_capability_arguments_throw() {
    let sandbox = Sandbox::builder().build().unwrap();
    let result = run(
        &sandbox,
        r#"const data = [{a: 1}];
           data[0].self = data;
           try {
             addWidget({title: "T", type: "bar", data: data, dataKeys: ["a"]});
           } catch (e) {
             log("rejected", e instanceof TypeError);
           }"#,
    )
    .await;

    assert!(result.is_success(), "{:?}", result.error);
    assert_eq!(result.log_lines, vec!["rejected true"]);
    assert!(sandbox.widgets().is_empty());
}

#[tokio::test]
async fn export_sees_the_snapshot_the_script_saw() {
    struct Recording(Arc<Mutex<Vec<DatasetSnapshot>>>);

    #[async_trait]
    impl ExportSink for Recording {
        async fn export(
            &self,
            format: ExportFormat,
            snapshot: &DatasetSnapshot,
        ) -> Result<ExportReceipt, ExportError> {
            self.0.lock().unwrap().push(snapshot.clone());
            Ok(ExportReceipt {
                format,
                records: snapshot.record_count(),
                location: None,
            })
        }
    }

    let exported = Arc::new(Mutex::new(Vec::new()));
    let sandbox = Sandbox::builder()
        .with_export_sink(Recording(Arc::clone(&exported)))
        .build()
        .unwrap();
    let snapshot = sample();
    let bindings = sandbox.bindings(&snapshot);
    let result = sandbox
        .run(
            r#"log(dataset.shopify.length); exportData("json");"#,
            bindings,
        )
        .await
        .unwrap();

    assert!(result.is_success(), "{:?}", result.error);
    assert_eq!(result.log_lines[0], "2");
    assert_eq!(*exported.lock().unwrap(), vec![snapshot]);
}

#[tokio::test]
async fn unhandled_rejection_fails_the_run() {
    let sandbox = Sandbox::builder().build().unwrap();
    let result = run(&sandbox, r#"log("before"); Promise.reject(new Error("late"));"#).await;
    assert_eq!(result.log_lines, vec!["before"]);
    let error = result.error.as_ref().unwrap();
    assert_eq!(error.kind, ScriptErrorKind::Runtime);
    assert_eq!(error.message, "late");
}

#[tokio::test]
async fn async_function_errors_are_reported() {
    let sandbox = Sandbox::builder().build().unwrap();
    let result = run(
        &sandbox,
        r#"(async () => {
             log("step 1");
             await null;
             log("step 2");
             throw new Error("async boom");
           })();"#,
    )
    .await;
    assert_eq!(result.log_lines, vec!["step 1", "step 2"]);
    assert_eq!(result.error_message(), Some("async boom"));
}

#[tokio::test]
async fn handled_rejection_is_not_an_error() {
    let sandbox = Sandbox::builder().build().unwrap();
    let result = run(
        &sandbox,
        r#"Promise.reject(1).catch((reason) => log("caught", reason));"#,
    )
    .await;
    assert!(result.is_success(), "{:?}", result.error);
    assert_eq!(result.log_lines, vec!["caught 1"]);
}

#[tokio::test]
async fn thrown_strings_become_messages() {
    let sandbox = Sandbox::builder().build().unwrap();
    let result = run(&sandbox, r#"throw "plain""#).await;
    assert_eq!(result.error_message(), Some("plain"));
}

#[tokio::test]
async fn output_handler_streams_lines() {
    struct Collect(Arc<Mutex<Vec<String>>>);

    #[async_trait]
    impl OutputHandler for Collect {
        async fn on_output(&self, line: &str) {
            self.0.lock().unwrap().push(line.to_string());
        }
    }

    let seen = Arc::new(Mutex::new(Vec::new()));
    let sandbox = Sandbox::builder()
        .with_output_handler(Collect(Arc::clone(&seen)))
        .build()
        .unwrap();
    let result = run(&sandbox, r#"log("one"); addMetric({name: "M", value: 1});"#).await;

    assert_eq!(*seen.lock().unwrap(), result.log_lines);
}

#[tokio::test]
async fn describe_lists_bindings_in_parameter_order() {
    let sandbox = Sandbox::builder().build().unwrap();
    let names: Vec<String> = sandbox
        .bindings(&sample())
        .describe()
        .into_iter()
        .map(|b| b.name)
        .collect();
    assert_eq!(
        names,
        vec![
            "dataset",
            "filters",
            "log",
            "addWidget",
            "addInsight",
            "addMetric",
            "exportData",
            "networkCall",
        ]
    );
}
