//! Parse schema DSL source into packet declarations using PEST.

use crate::ast::*;
use pest::Parser;
use pest_derive::Parser as PestParser;
use std::path::Path;

#[derive(PestParser)]
#[grammar = "grammar.pest"]
struct SchemaParser;

/// Parse schema source into declarations.
///
/// Only syntax is checked here; type names and dimensions are validated when the
/// packet is compiled into a [`Schema`](crate::schema::Schema).
pub fn parse(source: &str) -> Result<SchemaFile, String> {
    let pairs = SchemaParser::parse(Rule::schema, source)
        .map_err(|e| format!("Parse error: {}", e))?;
    let pair = pairs.into_iter().next().ok_or("Empty parse")?;
    build_schema(pair)
}

/// Read and parse a schema file.
pub fn parse_file<P: AsRef<Path>>(path: P) -> Result<SchemaFile, String> {
    let path = path.as_ref();
    let source = std::fs::read_to_string(path)
        .map_err(|e| format!("{}: {}", path.display(), e))?;
    parse(&source).map_err(|e| format!("{}: {}", path.display(), e))
}

fn build_schema(pair: pest::iterators::Pair<Rule>) -> Result<SchemaFile, String> {
    let mut packets = Vec::new();
    for inner in pair.into_inner() {
        if inner.as_rule() == Rule::packet {
            packets.push(build_packet(inner)?);
        }
    }
    Ok(SchemaFile { packets })
}

fn build_packet(pair: pest::iterators::Pair<Rule>) -> Result<PacketDecl, String> {
    let mut name = String::new();
    let mut fields = Vec::new();
    for inner in pair.into_inner() {
        match inner.as_rule() {
            Rule::ident => name = inner.as_str().to_string(),
            Rule::field => fields.push(build_field(inner)?),
            _ => {}
        }
    }
    if name.is_empty() {
        return Err("packet: missing name".to_string());
    }
    Ok(PacketDecl { name, fields })
}

fn build_field(pair: pest::iterators::Pair<Rule>) -> Result<FieldDecl, String> {
    let mut it = pair.into_inner();
    let name = it.next().ok_or("field: missing name")?.as_str().to_string();
    let field_type = it.next().ok_or("field: missing type")?;
    let inner = field_type
        .into_inner()
        .next()
        .ok_or_else(|| format!("field {}: empty type", name))?;
    let form = match inner.as_rule() {
        Rule::custom_type => {
            return Ok(FieldDecl {
                name,
                form: FieldForm::Custom,
                type_name: String::new(),
                dimension: None,
            })
        }
        Rule::pointer_type => FieldForm::Pointer,
        Rule::value_type => FieldForm::Value,
        other => return Err(format!("field {}: unexpected type rule {:?}", name, other)),
    };
    let mut type_name = String::new();
    let mut dimension = None;
    for part in inner.into_inner() {
        match part.as_rule() {
            Rule::ident => type_name = part.as_str().to_string(),
            Rule::dimension => dimension = Some(parse_dimension(&name, part)?),
            _ => {}
        }
    }
    Ok(FieldDecl {
        name,
        form,
        type_name,
        dimension,
    })
}

fn parse_dimension(field: &str, pair: pest::iterators::Pair<Rule>) -> Result<i64, String> {
    let int = pair
        .into_inner()
        .next()
        .ok_or_else(|| format!("field {}: empty dimension", field))?;
    int.as_str()
        .parse::<i64>()
        .map_err(|e| format!("field {}: bad dimension {:?}: {}", field, int.as_str(), e))
}
