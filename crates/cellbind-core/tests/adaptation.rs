//! End-to-end registration tests: descriptors run through a full pipeline
//! and are invoked the way a host would call them.

use chrono::NaiveDate;
use parking_lot::Mutex;
use rhi_cellbind_core::{
    Block, CallError, Callable, ContextKey, ErrorCode, ExecutionHandler, Extensions, FlowDirective,
    ConversionRule, FunctionDescriptor, FunctionRegistry, HandlerContext, HandlerKind,
    HandlerSelector, HostError, Marker, Marshalling, ObjectType, ParameterDescriptor, PipelineError,
    PipelineSpec, Property, ReferenceMarshalCache, ResolveError, Type, Value, from_serial,
};
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

fn make_test_registry(
    spec: &PipelineSpec,
    extensions: &Extensions,
    descriptors: Vec<FunctionDescriptor>,
) -> FunctionRegistry {
    let mut registry = FunctionRegistry::new();
    let failures = registry.register_with(&spec.build(extensions), descriptors);
    assert!(failures.is_empty(), "{failures:?}");
    registry
}

fn register(descriptors: Vec<FunctionDescriptor>) -> FunctionRegistry {
    make_test_registry(&PipelineSpec::new(), &Extensions::new(), descriptors)
}

fn number(value: &Value) -> Result<f64, CallError> {
    value
        .as_number()
        .ok_or_else(|| CallError::value(format!("not a number: {}", value.kind())))
}

// ============================================================================
// Parameter conversions
// ============================================================================

#[test]
fn test_optional_parameter_default() {
    let registry = register(vec![
        FunctionDescriptor::new(
            "OptionalDefault",
            Callable::new(vec![Type::Number], Type::Number, |args| {
                Ok(Value::Number(number(&args[0])?))
            }),
        )
        .param(
            0,
            ParameterDescriptor::new("value")
                .marker(Marker::Optional)
                .marker(Marker::DefaultValue(Value::Number(42.0))),
        ),
    ]);

    assert_eq!(
        registry.invoke("OptionalDefault", vec![Value::Missing]),
        Ok(Value::Number(42.0))
    );
    assert_eq!(
        registry.invoke("OptionalDefault", vec![Value::Number(7.5)]),
        Ok(Value::Number(7.5))
    );
    assert_eq!(
        registry.invoke("OptionalDefault", vec![Value::text(" 7.5 ")]),
        Ok(Value::Number(7.5))
    );
}

#[test]
fn test_empty_as_missing_from_spec() {
    let spec = PipelineSpec::from_bytes(
        b"conversions:\n  treat_empty_as_missing: true\n",
        Some("pipeline.yaml"),
    )
    .unwrap();
    let descriptor = FunctionDescriptor::new(
        "Fallback",
        Callable::new(vec![Type::Text], Type::Text, |args| Ok(args[0].clone())),
    )
    .param_marker(0, Marker::Optional)
    .param_marker(0, Marker::DefaultValue(Value::text("fallback")));
    let registry = make_test_registry(&spec, &Extensions::new(), vec![descriptor]);

    assert_eq!(
        registry.invoke("Fallback", vec![Value::Empty]),
        Ok(Value::text("fallback"))
    );
}

#[test]
fn test_nullable_parameter() {
    let registry = register(vec![FunctionDescriptor::new(
        "NullableRound",
        Callable::new(vec![Type::optional(Type::Number)], Type::Text, |args| {
            Ok(match &args[0] {
                Value::Null => Value::text("NULL!!!"),
                v => Value::Text(format!("{:.1}", (number(v)? * 10.0).round() / 10.0)),
            })
        }),
    )]);

    assert_eq!(
        registry.invoke("NullableRound", vec![Value::Number(3.25)]),
        Ok(Value::text("3.3"))
    );
    assert_eq!(
        registry.invoke("NullableRound", vec![Value::Missing]),
        Ok(Value::text("NULL!!!"))
    );
}

#[test]
fn test_int_result_widens_to_number() {
    let registry = register(vec![FunctionDescriptor::new(
        "AddOne",
        Callable::new(vec![Type::Int], Type::Int, |args| match &args[0] {
            Value::Int(i) => Ok(Value::Int(i + 1)),
            other => Err(CallError::value(other.kind())),
        }),
    )]);

    assert_eq!(
        registry.invoke("addone", vec![Value::Number(41.0)]),
        Ok(Value::Number(42.0))
    );
    let Ok(Value::Error(e)) = registry.invoke("AddOne", vec![Value::text("forty")]) else {
        panic!("expected a host error");
    };
    assert_eq!(e.code, ErrorCode::Value);
}

#[test]
fn test_custom_rule_precedes_standard_rules() {
    struct Celsius(f64);

    let temperature = ObjectType::new("Temperature").into_type();
    let extensions = Extensions::new().parameter_rule(rhi_cellbind_core::ConversionRule::parameter(
        "number-to-temperature",
        Type::Number,
        temperature.clone(),
        |v| {
            Ok(Value::Handle(rhi_cellbind_core::Handle::new(
                "Temperature",
                Celsius(number(&v)?),
            )))
        },
    ));
    let descriptor = FunctionDescriptor::new(
        "Fahrenheit",
        Callable::new(vec![temperature], Type::Number, |args| match &args[0] {
            Value::Handle(h) => {
                let c = h.downcast_ref::<Celsius>().map_or(0.0, |c| c.0);
                Ok(Value::Number(c * 9.0 / 5.0 + 32.0))
            }
            other => Err(CallError::value(other.kind())),
        }),
    );
    let registry = make_test_registry(&PipelineSpec::new(), &extensions, vec![descriptor]);

    assert_eq!(registry.get("Fahrenheit").unwrap().callable.params(), &[Type::Any]);
    assert_eq!(
        registry.invoke("Fahrenheit", vec![Value::text("100")]),
        Ok(Value::Number(212.0))
    );
}

#[test]
fn test_conversion_depth_overflow_fails_only_that_function() {
    let spec = PipelineSpec::from_bytes(b"conversions:\n  max_depth: 1\n", Some("pipeline.yaml"))
        .unwrap();
    let celsius = ObjectType::new("Celsius").into_type();
    let kelvin = ObjectType::new("Kelvin").into_type();
    let extensions = Extensions::new()
        .parameter_rule(ConversionRule::parameter(
            "kelvin-to-celsius",
            kelvin.clone(),
            celsius.clone(),
            Ok,
        ))
        .parameter_rule(ConversionRule::parameter(
            "celsius-to-kelvin",
            celsius.clone(),
            kelvin,
            Ok,
        ));
    let descriptors = vec![
        FunctionDescriptor::new(
            "Boil",
            Callable::new(vec![celsius], Type::Bool, |_| Ok(Value::Bool(true))),
        ),
        FunctionDescriptor::new(
            "Half",
            Callable::new(vec![Type::Number], Type::Number, |args| {
                Ok(Value::Number(number(&args[0])? / 2.0))
            }),
        ),
    ];

    let mut registry = FunctionRegistry::new();
    let failures = registry.register_with(&spec.build(&extensions), descriptors);
    assert_eq!(failures.len(), 1);
    let PipelineError::Conversion { function, source } = &failures[0];
    assert_eq!(function, "Boil");
    assert!(matches!(source, ResolveError::DepthExceeded { limit: 1, .. }));

    assert!(registry.get("Boil").is_none());
    assert_eq!(
        registry.invoke("Half", vec![Value::text("3")]),
        Ok(Value::Number(1.5))
    );
}

// ============================================================================
// Execution handlers
// ============================================================================

struct Recorder {
    name: &'static str,
    log: Arc<Mutex<Vec<String>>>,
    short_circuit: Option<Value>,
}

impl Recorder {
    fn record(&self, event: &str) {
        self.log.lock().push(format!("{}.{event}", self.name));
    }
}

impl ExecutionHandler for Recorder {
    fn on_entry(&self, ctx: &mut HandlerContext) -> Result<(), CallError> {
        self.record("OnEntry");
        if let Some(value) = &self.short_circuit {
            ctx.return_value = value.clone();
            ctx.flow = FlowDirective::Return;
        }
        Ok(())
    }

    fn on_success(&self, _ctx: &mut HandlerContext) -> Result<(), CallError> {
        self.record("OnSuccess");
        Ok(())
    }

    fn on_exception(&self, _ctx: &mut HandlerContext) {
        self.record("OnException");
    }

    fn on_exit(&self, _ctx: &mut HandlerContext) {
        self.record("OnExit");
    }
}

fn recorder(
    name: &'static str,
    log: &Arc<Mutex<Vec<String>>>,
    short_circuit: Option<Value>,
) -> HandlerSelector {
    let log = Arc::clone(log);
    HandlerSelector::new(name, move |_| {
        Some(Arc::new(Recorder {
            name,
            log: Arc::clone(&log),
            short_circuit: short_circuit.clone(),
        }) as Arc<dyn ExecutionHandler>)
    })
}

fn logged_function(log: &Arc<Mutex<Vec<String>>>) -> FunctionDescriptor {
    let log = Arc::clone(log);
    FunctionDescriptor::new(
        "Work",
        Callable::new(vec![Type::Number], Type::Number, move |args| {
            log.lock().push("call".into());
            Ok(Value::Number(number(&args[0])? + 1.0))
        }),
    )
}

#[test]
fn test_handlers_nest_in_registration_order() {
    let log = Arc::new(Mutex::new(Vec::new()));
    let extensions = Extensions::new()
        .selector(recorder("A", &log, None))
        .selector(recorder("B", &log, None));
    let registry = make_test_registry(&PipelineSpec::new(), &extensions, vec![logged_function(&log)]);

    assert_eq!(registry.invoke("Work", vec![Value::Number(1.0)]), Ok(Value::Number(2.0)));
    assert_eq!(
        *log.lock(),
        vec![
            "B.OnEntry",
            "A.OnEntry",
            "call",
            "A.OnSuccess",
            "A.OnExit",
            "B.OnSuccess",
            "B.OnExit",
        ]
    );
}

#[test]
fn test_handler_short_circuits_call() {
    let log = Arc::new(Mutex::new(Vec::new()));
    let extensions = Extensions::new().selector(recorder("A", &log, Some(Value::Number(99.0))));
    let registry = make_test_registry(&PipelineSpec::new(), &extensions, vec![logged_function(&log)]);

    assert_eq!(registry.invoke("Work", vec![Value::Number(1.0)]), Ok(Value::Number(99.0)));
    assert_eq!(*log.lock(), vec!["A.OnEntry", "A.OnExit"]);
}

#[test]
fn test_cache_handler_skips_repeat_calls() {
    let calls = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&calls);
    let descriptor = FunctionDescriptor::new(
        "Square",
        Callable::new(vec![Type::Number], Type::Number, move |args| {
            counter.fetch_add(1, Ordering::SeqCst);
            let x = number(&args[0])?;
            Ok(Value::Number(x * x))
        }),
    )
    .marker(Marker::Custom(rhi_cellbind_core::CACHE_TAG.into()));
    let spec = PipelineSpec::new().handler(HandlerKind::Cache);
    let registry = make_test_registry(&spec, &Extensions::new(), vec![descriptor]);

    for _ in 0..3 {
        assert_eq!(registry.invoke("Square", vec![Value::Number(3.0)]), Ok(Value::Number(9.0)));
    }
    assert_eq!(registry.invoke("Square", vec![Value::Number(4.0)]), Ok(Value::Number(16.0)));
    assert_eq!(calls.load(Ordering::SeqCst), 2);
}

// ============================================================================
// Array/record shim
// ============================================================================

fn sample_type() -> Type {
    ObjectType::new("Sample")
        .property(Property::new("D", Type::Number))
        .property(Property::new("I", Type::Int))
        .property(Property::new("S", Type::Text))
        .property(Property::new("Dt", Type::DateTime))
        .into_type()
}

fn datetime(y: i32, m: u32, d: u32, hh: u32, mm: u32, ss: u32) -> Value {
    Value::DateTime(
        NaiveDate::from_ymd_opt(y, m, d)
            .unwrap()
            .and_hms_opt(hh, mm, ss)
            .unwrap(),
    )
}

#[test]
fn test_record_sequence_round_trip() {
    let sample = sample_type();
    let registry = register(vec![FunctionDescriptor::new(
        "Reverse",
        Callable::new(
            vec![Type::sequence(sample.clone())],
            Type::sequence(sample),
            |mut args| match args.remove(0) {
                Value::List(mut items) => {
                    items.reverse();
                    Ok(Value::List(items))
                }
                other => Err(CallError::value(other.kind())),
            },
        ),
    )]);

    let input = Block::from_rows(vec![
        vec![Value::text("I"), Value::text("S"), Value::text("D"), Value::text("DT")],
        vec![
            Value::Int(123),
            Value::text("123"),
            Value::Number(123.0),
            datetime(2014, 3, 10, 17, 40, 21),
        ],
        vec![
            Value::Int(456),
            Value::text("456"),
            Value::Number(456.0),
            datetime(2001, 11, 23, 22, 45, 0),
        ],
        vec![
            Value::Number(56789.3),
            Value::Int(56789),
            Value::Int(56789),
            Value::Number(41910.0),
        ],
    ])
    .unwrap();

    let Ok(Value::Block(output)) = registry.invoke("Reverse", vec![Value::Block(input)]) else {
        panic!("expected a block");
    };
    assert_eq!(output.rows(), 4);
    assert_eq!(
        output.row(0),
        &[Value::text("D"), Value::text("I"), Value::text("S"), Value::text("Dt")]
    );
    assert_eq!(
        output.row(1),
        &[
            Value::Number(56789.0),
            Value::Int(56789),
            Value::text("56789"),
            Value::DateTime(from_serial(41910.0).unwrap()),
        ]
    );
    assert_eq!(
        output.row(3),
        &[
            Value::Number(123.0),
            Value::Int(123),
            Value::text("123"),
            datetime(2014, 3, 10, 17, 40, 21),
        ]
    );

    let descriptor = registry.get("Reverse").unwrap();
    assert_eq!(
        descriptor.parameters[0].description,
        "array, with header row containing: D,I,S,Dt"
    );
}

#[test]
fn test_map_array_conversion_error_block() {
    let registry = register(vec![
        FunctionDescriptor::new(
            "And",
            Callable::new(vec![Type::Bool, Type::Bool], Type::Bool, |args| {
                Ok(Value::Bool(
                    args[0].as_bool().unwrap_or(false) && args[1].as_bool().unwrap_or(false),
                ))
            }),
        )
        .marker(Marker::MapArray),
    ]);

    assert_eq!(
        registry.invoke("And", vec![Value::Bool(true), Value::text("TRUE")]),
        Ok(Value::Bool(true))
    );

    let message = "Failed to convert parameter 2: String was not recognized as a valid Boolean.";
    assert_eq!(
        registry.invoke("And", vec![Value::Bool(true), Value::text("maybe")]),
        Ok(Value::Block(Block::column(vec![
            Value::Error(HostError::new(ErrorCode::Value, message)),
            Value::text(message),
        ])))
    );
}

#[test]
fn test_block_without_header_row() {
    let registry = register(vec![FunctionDescriptor::new(
        "CountSamples",
        Callable::new(vec![Type::sequence(sample_type())], Type::Int, |args| match &args[0] {
            Value::List(items) => Ok(Value::Int(items.len() as i64)),
            other => Err(CallError::value(other.kind())),
        }),
    )]);

    let empty = Value::Block(Block::from_rows(vec![]).unwrap());
    let message = "Failed to convert parameter 1: Expected an array with a header row";
    assert_eq!(
        registry.invoke("CountSamples", vec![empty]),
        Ok(Value::Block(Block::column(vec![
            Value::Error(HostError::new(ErrorCode::Value, message)),
            Value::text(message),
        ])))
    );
}

#[test]
fn test_propertyless_record_sequence_left_alone() {
    let empty = ObjectType::new("Empty").into_type();
    let params = vec![Type::sequence(empty)];
    let registry = register(vec![FunctionDescriptor::new(
        "Count",
        Callable::new(params.clone(), Type::Number, |args| match &args[0] {
            Value::List(items) => Ok(Value::Number(items.len() as f64)),
            other => Err(CallError::value(other.kind())),
        }),
    )]);

    let descriptor = registry.get("Count").unwrap();
    assert_eq!(descriptor.callable.params(), params.as_slice());
    assert!(descriptor.parameters[0].description.is_empty());
}

// ============================================================================
// Objects by reference
// ============================================================================

struct Operands(f64, f64);

fn calc_functions() -> Vec<FunctionDescriptor> {
    let calc = ObjectType::new("Calc").by_ref().into_type();
    vec![
        FunctionDescriptor::new(
            "CalcCreate",
            Callable::new(vec![Type::Number, Type::Number], calc.clone(), |args| {
                let operands = Operands(number(&args[0])?, number(&args[1])?);
                Ok(Value::Handle(rhi_cellbind_core::Handle::new("Calc", operands)))
            }),
        ),
        FunctionDescriptor::new(
            "CalcSum",
            Callable::new(vec![calc], Type::Number, |args| match &args[0] {
                Value::Handle(h) => {
                    let Operands(x, y) = h
                        .downcast_ref::<Operands>()
                        .ok_or_else(|| CallError::value("not a calc"))?;
                    Ok(Value::Number(x + y))
                }
                other => Err(CallError::value(other.kind())),
            }),
        ),
    ]
}

fn calc_registry(cache: &Arc<ReferenceMarshalCache>) -> FunctionRegistry {
    let extensions = Extensions::new().marshalling(Marshalling::per_thread(Arc::clone(cache)));
    make_test_registry(&PipelineSpec::new(), &extensions, calc_functions())
}

fn text(value: Value) -> String {
    match value {
        Value::Text(s) => s,
        other => panic!("expected text, got {other:?}"),
    }
}

#[test]
fn test_objects_pass_by_reference() {
    let cache = Arc::new(ReferenceMarshalCache::new());
    let registry = calc_registry(&cache);
    let cell = ContextKey::Cell { row: 1, column: 1 };

    let id = text(
        registry
            .invoke_as(cell, "CalcCreate", vec![Value::Number(1.0), Value::Number(2.0)])
            .unwrap(),
    );
    assert!(id.starts_with("Calc@"));
    assert_eq!(
        registry.invoke("CalcSum", vec![Value::text(id)]),
        Ok(Value::Number(3.0))
    );

    // The id is the whole conversion: no scalar coercion in front of it.
    assert_eq!(registry.get("CalcSum").unwrap().callable.params(), &[Type::Text]);
    let Ok(Value::Error(e)) = registry.invoke("CalcSum", vec![Value::Bool(true)]) else {
        panic!("expected a host error");
    };
    assert_eq!(e.message, "Expected an object id for Calc, got bool");
}

#[test]
fn test_recalculation_releases_previous_object() {
    let cache = Arc::new(ReferenceMarshalCache::new());
    let registry = calc_registry(&cache);
    let cell = ContextKey::Cell { row: 1, column: 1 };
    let args = || vec![Value::Number(1.0), Value::Number(2.0)];

    let first = text(registry.invoke_as(cell.clone(), "CalcCreate", args()).unwrap());
    let second = text(registry.invoke_as(cell, "CalcCreate", args()).unwrap());
    assert_ne!(first, second);
    assert_eq!(cache.len(), 1);

    // Still visible to the worker until it moves on to another caller.
    assert_eq!(
        registry.invoke("CalcSum", vec![Value::text(first.clone())]),
        Ok(Value::Number(3.0))
    );
    let other = ContextKey::Cell { row: 2, column: 1 };
    registry.invoke_as(other, "CalcCreate", args()).unwrap();
    assert_eq!(cache.len(), 2);

    assert_eq!(
        registry.invoke("CalcSum", vec![Value::text(second)]),
        Ok(Value::Number(3.0))
    );
    let Ok(Value::Error(e)) = registry.invoke("CalcSum", vec![Value::text(first.clone())]) else {
        panic!("expected a host error");
    };
    assert_eq!(e.code, ErrorCode::Value);
    assert!(e.message.contains(&first));
}

#[test]
fn test_concurrent_callers_get_distinct_objects() {
    let cache = Arc::new(ReferenceMarshalCache::new());
    let registry = calc_registry(&cache);

    let ids: Vec<String> = std::thread::scope(|s| {
        let handles: Vec<_> = (1..=8u32)
            .map(|row| {
                let registry = &registry;
                s.spawn(move || {
                    let cell = ContextKey::Cell { row, column: 1 };
                    let args = vec![Value::Number(row as f64), Value::Number(1.0)];
                    text(registry.invoke_as(cell, "CalcCreate", args).unwrap())
                })
            })
            .collect();
        handles.into_iter().map(|h| h.join().unwrap()).collect()
    });

    let mut unique = ids.clone();
    unique.sort();
    unique.dedup();
    assert_eq!(unique.len(), 8);
    assert_eq!(cache.len(), 8);

    for (row, id) in (1..=8).zip(ids) {
        assert_eq!(
            registry.invoke("CalcSum", vec![Value::text(id)]),
            Ok(Value::Number(row as f64 + 1.0))
        );
    }
}

// ============================================================================
// Error boundary
// ============================================================================

#[test]
fn test_panics_become_host_errors() {
    let registry = register(vec![FunctionDescriptor::new(
        "Boom",
        Callable::new(vec![], Type::Number, |_| panic!("boom")),
    )]);

    assert_eq!(
        registry.invoke("Boom", vec![]),
        Ok(Value::Error(HostError::new(ErrorCode::Value, "boom")))
    );
}

#[test]
fn test_without_error_boundary_errors_propagate() {
    let spec = PipelineSpec::from_bytes(
        br#"{"passes": ["parameter-conversions"]}"#,
        Some("pipeline.json"),
    )
    .unwrap();
    let descriptor = FunctionDescriptor::new(
        "Fail",
        Callable::new(vec![], Type::Number, |_| {
            Err(CallError::new(ErrorCode::NotAvailable, "no data"))
        }),
    );
    let registry = make_test_registry(&spec, &Extensions::new(), vec![descriptor]);

    let err = registry.invoke("Fail", vec![]).unwrap_err();
    assert_eq!(err.to_string(), "no data");
}
