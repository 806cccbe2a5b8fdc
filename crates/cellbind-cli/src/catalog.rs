//! Demo function catalog.
//!
//! A small set of functions that exercise each adaptation: optional and
//! nullable parameters, enums, a custom type conversion, objects passed by
//! reference, record arrays and result caching.

use rhi_cellbind_core::{
    CACHE_TAG, CallError, Callable, ConversionRule, EnumType, EnumValue, ErrorCode, Extensions,
    FunctionDescriptor, Handle, Marker, Marshalling, ObjectType, ParameterDescriptor, Property,
    Record, Type, Value,
};
use std::sync::{Arc, LazyLock};

static COLOR: LazyLock<Arc<EnumType>> =
    LazyLock::new(|| Arc::new(EnumType::new("Color", &["Red", "Green", "Blue"])));

static TEMPERATURE: LazyLock<Arc<ObjectType>> =
    LazyLock::new(|| Arc::new(ObjectType::new("Temperature")));

static CALC: LazyLock<Arc<ObjectType>> =
    LazyLock::new(|| Arc::new(ObjectType::new("Calc").by_ref()));

static SAMPLE: LazyLock<Arc<ObjectType>> = LazyLock::new(|| {
    Arc::new(
        ObjectType::new("Sample")
            .property(Property::new("D", Type::Number))
            .property(Property::new("I", Type::Int))
            .property(Property::new("S", Type::Text))
            .property(Property::new("Dt", Type::DateTime)),
    )
});

fn color() -> Type {
    Type::Enum(Arc::clone(&COLOR))
}

fn temperature() -> Type {
    Type::Object(Arc::clone(&TEMPERATURE))
}

fn calc() -> Type {
    Type::Object(Arc::clone(&CALC))
}

fn sample() -> Type {
    Type::Object(Arc::clone(&SAMPLE))
}

/// Celsius reading carried by `Temperature` handles.
struct Celsius(f64);

/// Operands held by a `Calc` object.
struct Operands(f64, f64);

fn number(value: &Value) -> Result<f64, CallError> {
    value
        .as_number()
        .ok_or_else(|| CallError::value(format!("expected a number, got {}", value.kind())))
}

fn handle<'a, T: 'static>(value: &'a Value, name: &str) -> Result<&'a T, CallError> {
    match value {
        Value::Handle(h) => h
            .downcast_ref::<T>()
            .ok_or_else(|| CallError::value(format!("expected {name}"))),
        other => Err(CallError::value(format!("expected {name}, got {}", other.kind()))),
    }
}

/// Round half away from zero to one decimal place.
fn one_decimal(x: f64) -> String {
    format!("{:.1}", (x * 10.0).round() / 10.0)
}

/// Conversion rules for the catalog's custom types.
pub fn extensions(marshalling: Marshalling) -> Extensions {
    Extensions::new()
        .marshalling(marshalling)
        .parameter_rule(ConversionRule::parameter(
            "number-to-temperature",
            Type::Number,
            temperature(),
            |v| Ok(Value::Handle(Handle::new("Temperature", Celsius(number(&v)?)))),
        ))
        .return_rule(ConversionRule::returning(
            "temperature-to-number",
            temperature(),
            Type::Number,
            |v| Ok(Value::Number(handle::<Celsius>(&v, "Temperature")?.0)),
        ))
}

/// The catalog, before any registration passes.
pub fn descriptors() -> Vec<FunctionDescriptor> {
    vec![
        FunctionDescriptor::new(
            "AddOne",
            Callable::new(vec![Type::Int], Type::Int, |args| match &args[0] {
                Value::Int(i) => Ok(Value::Int(i + 1)),
                other => Err(CallError::value(format!("expected int, got {}", other.kind()))),
            }),
        )
        .description("Adds one to an integer")
        .category("Basics")
        .param(0, ParameterDescriptor::new("x")),
        FunctionDescriptor::new(
            "Divide",
            Callable::new(vec![Type::Number, Type::Number], Type::Number, |args| {
                let (a, b) = (number(&args[0])?, number(&args[1])?);
                if b == 0.0 {
                    return Err(CallError::new(ErrorCode::Div0, "division by zero"));
                }
                Ok(Value::Number(a / b))
            }),
        )
        .description("Divides two numbers")
        .category("Basics")
        .param(0, ParameterDescriptor::new("numerator"))
        .param(1, ParameterDescriptor::new("denominator")),
        FunctionDescriptor::new(
            "NullableRound",
            Callable::new(vec![Type::optional(Type::Number)], Type::Text, |args| {
                Ok(match &args[0] {
                    Value::Null => Value::text("NULL!!!"),
                    v => Value::Text(one_decimal(number(v)?)),
                })
            }),
        )
        .description("Rounds to one decimal, or reports a missing value")
        .category("Optional")
        .param(0, ParameterDescriptor::new("value")),
        FunctionDescriptor::new(
            "OptionalDefault",
            Callable::new(vec![Type::Number], Type::Text, |args| {
                Ok(Value::Text(format!("VALUE: {:.1}", number(&args[0])?)))
            }),
        )
        .description("Echoes its argument, 42 when omitted")
        .category("Optional")
        .param(
            0,
            ParameterDescriptor::new("value")
                .marker(Marker::Optional)
                .marker(Marker::DefaultValue(Value::Number(42.0))),
        ),
        FunctionDescriptor::new(
            "MultipleOptional",
            Callable::new(vec![Type::Number, Type::Text], Type::Text, |args| {
                let text = args[1].as_text().unwrap_or_default();
                Ok(Value::Text(format!(
                    "VALUES: {:.7} & {text}",
                    number(&args[0])?
                )))
            }),
        )
        .category("Optional")
        .param(
            0,
            ParameterDescriptor::new("first")
                .marker(Marker::Optional)
                .marker(Marker::DefaultValue(Value::Number(3.14159265))),
        )
        .param(
            1,
            ParameterDescriptor::new("second")
                .marker(Marker::Optional)
                .marker(Marker::DefaultValue(Value::text("@42@"))),
        ),
        FunctionDescriptor::new(
            "NextColor",
            Callable::new(vec![color()], color(), |args| {
                let Value::Enum(current) = &args[0] else {
                    return Err(CallError::value("expected a color"));
                };
                let index = COLOR
                    .variants
                    .iter()
                    .position(|v| *v == current.variant)
                    .unwrap_or(0);
                let next = &COLOR.variants[(index + 1) % COLOR.variants.len()];
                Ok(Value::Enum(EnumValue::new(&COLOR.name, next)))
            }),
        )
        .description("Cycles Red, Green, Blue")
        .category("Enums")
        .param(0, ParameterDescriptor::new("color")),
        FunctionDescriptor::new(
            "Warmer",
            Callable::new(vec![temperature(), Type::Number], temperature(), |args| {
                let Celsius(c) = handle::<Celsius>(&args[0], "Temperature")?;
                let delta = number(&args[1])?;
                Ok(Value::Handle(Handle::new("Temperature", Celsius(c + delta))))
            }),
        )
        .description("Raises a temperature in degrees Celsius")
        .category("Conversions")
        .param(0, ParameterDescriptor::new("celsius"))
        .param(1, ParameterDescriptor::new("delta")),
        FunctionDescriptor::new(
            "CalcCreate",
            Callable::new(vec![Type::Number, Type::Number], calc(), |args| {
                let operands = Operands(number(&args[0])?, number(&args[1])?);
                Ok(Value::Handle(Handle::new("Calc", operands)))
            }),
        )
        .description("Creates a calculator object and returns its id")
        .category("References")
        .param(0, ParameterDescriptor::new("x"))
        .param(1, ParameterDescriptor::new("y")),
        FunctionDescriptor::new(
            "CalcSum",
            Callable::new(vec![calc()], Type::Number, |args| {
                let Operands(x, y) = handle::<Operands>(&args[0], "Calc")?;
                Ok(Value::Number(x + y))
            }),
        )
        .description("Adds the operands of a calculator object")
        .category("References")
        .param(0, ParameterDescriptor::new("calc")),
        FunctionDescriptor::new(
            "ReverseSamples",
            Callable::new(
                vec![Type::sequence(sample())],
                Type::sequence(sample()),
                |mut args| match args.remove(0) {
                    Value::List(mut items) => {
                        items.reverse();
                        Ok(Value::List(items))
                    }
                    other => Err(CallError::value(format!("expected samples, got {}", other.kind()))),
                },
            ),
        )
        .category("Arrays")
        .param(0, ParameterDescriptor::new("samples")),
        FunctionDescriptor::new(
            "SampleOf",
            Callable::new(vec![Type::Number], Type::sequence(sample()), |args| {
                let d = number(&args[0])?;
                let record = Record::new("Sample")
                    .with("D", Value::Number(d))
                    .with("I", Value::Int(d.round_ties_even() as i64))
                    .with("S", Value::Text(d.to_string()))
                    .with("Dt", Value::Null);
                Ok(Value::List(vec![Value::Record(record)]))
            }),
        )
        .category("Arrays")
        .param(0, ParameterDescriptor::new("d")),
        FunctionDescriptor::new(
            "Total",
            Callable::new(vec![Type::sequence(Type::Number)], Type::Number, |args| {
                let Value::List(items) = &args[0] else {
                    return Err(CallError::value("expected numbers"));
                };
                let mut total = 0.0;
                for item in items {
                    total += number(item)?;
                }
                Ok(Value::Number(total))
            }),
        )
        .description("Sums every cell of a range")
        .category("Arrays")
        .marker(Marker::MapArray)
        .param(0, ParameterDescriptor::new("values")),
        FunctionDescriptor::new(
            "And",
            Callable::new(vec![Type::Bool, Type::Bool], Type::Bool, |args| {
                Ok(Value::Bool(
                    args[0].as_bool().unwrap_or(false) && args[1].as_bool().unwrap_or(false),
                ))
            }),
        )
        .category("Arrays")
        .marker(Marker::MapArray)
        .param(0, ParameterDescriptor::new("a"))
        .param(1, ParameterDescriptor::new("b")),
        FunctionDescriptor::new(
            "SlowSquare",
            Callable::new(vec![Type::Number], Type::Number, |args| {
                let x = number(&args[0])?;
                std::thread::sleep(std::time::Duration::from_millis(20));
                Ok(Value::Number(x * x))
            }),
        )
        .description("Squares a number slowly; results are cached")
        .category("Handlers")
        .marker(Marker::Custom(CACHE_TAG.into()))
        .param(0, ParameterDescriptor::new("x")),
    ]
}
