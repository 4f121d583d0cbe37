//! Work with packet schema files from the command line.
//!
//! Usage:
//!   xpacket check FILE...
//!   xpacket layout FILE [PACKET]
//!   xpacket encode FILE PACKET [FIELD=VALUE ...]
//!   xpacket decode FILE PACKET HEX...
//!
//! Values are decimal or `0x` hex; arrays take comma-separated values (`arr=1,2,3`).
//! Fields not assigned encode as zero. Pointer fields are backed by storage owned
//! by the tool. Custom fields need hooks supplied by a program, so they pass
//! `check` and `layout` but cannot be encoded or decoded here.
//!
//! Set `RUST_LOG=debug` to trace schema compilation.

use anyhow::{anyhow, bail, Context};
use std::cell::Cell;
use std::collections::{HashMap, HashSet};
use tracing_subscriber::EnvFilter;
use xpacket::dump::{format_layout, format_record, parse_hex, to_hex};
use xpacket::{
    parse_file, CodecError, CustomField, ElementType, FieldForm, FieldKind, HookRegistry,
    Record, Schema, SchemaError, SchemaFile, SchemaSet, Value,
};

const USAGE: &str = "usage:
  xpacket check FILE...
  xpacket layout FILE [PACKET]
  xpacket encode FILE PACKET [FIELD=VALUE ...]
  xpacket decode FILE PACKET HEX...";

/// Stand-in hook so schemas with custom fields still compile.
struct NoHook;

impl CustomField for NoHook {
    type Value = ();

    fn encode(&self, _: &mut [u8], _: usize, _: &()) -> Result<usize, CodecError> {
        Err(CodecError::Custom("custom fields need a hook; not available from the command line".to_string()))
    }

    fn decode(&self, _: &[u8], _: usize, _: &mut ()) -> Result<usize, CodecError> {
        Err(CodecError::Custom("custom fields need a hook; not available from the command line".to_string()))
    }
}

fn placeholder_hooks(file: &SchemaFile) -> HookRegistry {
    let mut hooks = HookRegistry::new();
    for packet in &file.packets {
        for field in packet.fields.iter().filter(|f| f.form == FieldForm::Custom) {
            hooks.register(&field.name, NoHook);
        }
    }
    hooks
}

fn load(path: &str) -> anyhow::Result<SchemaSet> {
    let file = parse_file(path).map_err(|e| anyhow!(e))?;
    let hooks = placeholder_hooks(&file);
    SchemaSet::resolve(&file, &hooks).with_context(|| format!("{}: invalid schema", path))
}

fn packet<'s>(set: &'s SchemaSet, name: &str) -> anyhow::Result<&'s Schema> {
    set.get(name).ok_or_else(|| {
        let known: Vec<&str> = set.names().collect();
        anyhow!("unknown packet {:?} (known: {})", name, known.join(", "))
    })
}

fn check(files: &[String]) -> anyhow::Result<bool> {
    if files.is_empty() {
        bail!(USAGE);
    }
    let mut ok = true;
    for path in files {
        let file = match parse_file(path) {
            Ok(f) => f,
            Err(e) => {
                eprintln!("{}", e);
                ok = false;
                continue;
            }
        };
        let hooks = placeholder_hooks(&file);
        let mut seen = HashSet::new();
        for decl in &file.packets {
            if !seen.insert(decl.name.as_str()) {
                eprintln!("{}: {}", path, SchemaError::DuplicatePacket(decl.name.clone()));
                ok = false;
                continue;
            }
            let errors = Schema::validate(decl, &hooks);
            if errors.is_empty() {
                println!("{}: packet {} ok", path, decl.name);
            }
            for e in &errors {
                eprintln!("{}: {}", path, e);
                ok = false;
            }
        }
    }
    Ok(ok)
}

fn layout(args: &[String]) -> anyhow::Result<bool> {
    let (path, selected) = match args {
        [path] => (path, None),
        [path, name] => (path, Some(name.as_str())),
        _ => bail!(USAGE),
    };
    let set = load(path)?;
    match selected {
        Some(name) => print!("{}", format_layout(packet(&set, name)?)),
        None => {
            for schema in set.iter() {
                print!("{}", format_layout(schema));
            }
        }
    }
    Ok(true)
}

/// Tool-owned memory behind a pointer field.
struct Backing {
    name: String,
    array: bool,
    cells: Cells,
}

enum Cells {
    U8(Vec<Cell<u8>>),
    U16(Vec<Cell<u16>>),
    U32(Vec<Cell<u32>>),
}

impl Backing {
    fn new(name: &str, ty: ElementType, dimension: Option<usize>, init: Option<&[u32]>) -> anyhow::Result<Self> {
        let len = dimension.unwrap_or(1);
        let values = match init {
            Some(v) => v.to_vec(),
            None => vec![0; len],
        };
        let cells = match ty {
            ElementType::U8 => Cells::U8(narrow::<u8>(name, len, &values)?.into_iter().map(Cell::new).collect()),
            ElementType::U16 => Cells::U16(narrow::<u16>(name, len, &values)?.into_iter().map(Cell::new).collect()),
            ElementType::U32 => Cells::U32(narrow::<u32>(name, len, &values)?.into_iter().map(Cell::new).collect()),
        };
        Ok(Backing {
            name: name.to_string(),
            array: dimension.is_some(),
            cells,
        })
    }

    fn bind<'a>(&'a self, record: &mut Record<'a>) -> Result<(), CodecError> {
        let name = self.name.as_str();
        match (&self.cells, self.array) {
            (Cells::U8(c), true) => record.bind_slice(name, &c[..]),
            (Cells::U16(c), true) => record.bind_slice(name, &c[..]),
            (Cells::U32(c), true) => record.bind_slice(name, &c[..]),
            (Cells::U8(c), false) => record.bind(name, &c[0]),
            (Cells::U16(c), false) => record.bind(name, &c[0]),
            (Cells::U32(c), false) => record.bind(name, &c[0]),
        }
    }
}

fn backings(schema: &Schema, values: &HashMap<String, Vec<u32>>) -> anyhow::Result<Vec<Backing>> {
    let mut out = Vec::new();
    for f in schema.fields() {
        let init = values.get(&f.name).map(Vec::as_slice);
        match f.kind {
            FieldKind::PointerScalar(ty) => out.push(Backing::new(&f.name, ty, None, init)?),
            FieldKind::PointerArray(ty, n) => out.push(Backing::new(&f.name, ty, Some(n), init)?),
            _ => {}
        }
    }
    Ok(out)
}

fn narrow<T: TryFrom<u32>>(field: &str, len: usize, values: &[u32]) -> anyhow::Result<Vec<T>> {
    if values.len() != len {
        bail!("{}: expected {} value(s), got {}", field, len, values.len());
    }
    values
        .iter()
        .map(|&v| T::try_from(v).map_err(|_| anyhow!("{}: value {} out of range", field, v)))
        .collect()
}

fn parse_number(text: &str) -> anyhow::Result<u32> {
    let text = text.trim();
    let parsed = match text.strip_prefix("0x").or_else(|| text.strip_prefix("0X")) {
        Some(hex) => u32::from_str_radix(hex, 16),
        None => text.parse::<u32>(),
    };
    parsed.with_context(|| format!("invalid number {:?}", text))
}

fn parse_assignments(schema: &Schema, args: &[String]) -> anyhow::Result<HashMap<String, Vec<u32>>> {
    let mut values = HashMap::new();
    for arg in args {
        let (name, rhs) = arg
            .split_once('=')
            .ok_or_else(|| anyhow!("expected FIELD=VALUE, got {:?}", arg))?;
        if schema.field(name).is_none() {
            bail!("packet {} has no field {:?}", schema.name(), name);
        }
        let list = rhs.split(',').map(parse_number).collect::<anyhow::Result<Vec<u32>>>()?;
        values.insert(name.to_string(), list);
    }
    Ok(values)
}

fn encode(args: &[String]) -> anyhow::Result<bool> {
    let [path, name, assignments @ ..] = args else {
        bail!(USAGE);
    };
    let set = load(path)?;
    let schema = packet(&set, name)?;
    let values = parse_assignments(schema, assignments)?;
    let storage = backings(schema, &values)?;

    let mut record = Record::new(schema);
    for b in &storage {
        b.bind(&mut record)?;
    }
    for f in schema.fields() {
        let Some(v) = values.get(&f.name) else { continue };
        match f.kind {
            FieldKind::Scalar(ty) => {
                let [n] = v.as_slice() else {
                    bail!("{}: expected a single value", f.name);
                };
                let value = Value::from_u32(ty, *n)
                    .ok_or_else(|| anyhow!("{}: value {} does not fit {}", f.name, n, ty))?;
                record.set(&f.name, value)?;
            }
            FieldKind::Array(ElementType::U8, n) => record.set_array(&f.name, narrow::<u8>(&f.name, n, v)?)?,
            FieldKind::Array(ElementType::U16, n) => record.set_array(&f.name, narrow::<u16>(&f.name, n, v)?)?,
            FieldKind::Array(ElementType::U32, n) => record.set_array(&f.name, narrow::<u32>(&f.name, n, v)?)?,
            FieldKind::PointerScalar(_) | FieldKind::PointerArray(..) => {}
            FieldKind::Custom(_) => bail!("{}: custom fields cannot be set from the command line", f.name),
        }
    }

    let bytes = schema.encode_to_vec(&record)?;
    println!("{}", to_hex(&bytes));
    Ok(true)
}

fn decode(args: &[String]) -> anyhow::Result<bool> {
    let [path, name, hex @ ..] = args else {
        bail!(USAGE);
    };
    let set = load(path)?;
    let schema = packet(&set, name)?;
    let bytes = parse_hex(&hex.join(" ")).map_err(|e| anyhow!(e))?;
    let storage = backings(schema, &HashMap::new())?;

    let mut record = Record::new(schema);
    for b in &storage {
        b.bind(&mut record)?;
    }
    let n = schema.decode(&bytes, &mut record)?;
    print!("{}", format_record(&record));
    if n < bytes.len() {
        eprintln!("{} trailing byte(s) not consumed", bytes.len() - n);
    }
    Ok(true)
}

fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")))
        .with_writer(std::io::stderr)
        .init();

    let args: Vec<String> = std::env::args().skip(1).collect();
    let Some((command, rest)) = args.split_first() else {
        eprintln!("{}", USAGE);
        std::process::exit(2);
    };
    let ok = match command.as_str() {
        "check" => check(rest)?,
        "layout" => layout(rest)?,
        "encode" => encode(rest)?,
        "decode" => decode(rest)?,
        "help" | "-h" | "--help" => {
            println!("{}", USAGE);
            true
        }
        other => bail!("unknown command {:?}\n{}", other, USAGE),
    };
    if !ok {
        std::process::exit(1);
    }
    Ok(())
}
