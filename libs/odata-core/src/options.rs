//! System query options and the small text parsers for the non-filter options.

use crate::ast::Expr;
use crate::{Error, ODataQuery};

pub const MAX_ORDERBY_LEN: usize = 1024;
pub const MAX_ORDER_FIELDS: usize = 10;
pub const MAX_SELECT_ITEMS: usize = 256;
pub const MAX_EXPAND_DEPTH: usize = 8;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
pub enum SortDir {
    #[default]
    Asc,
    Desc,
}

#[derive(Clone, Debug, PartialEq)]
pub struct OrderByItem {
    pub expr: Expr,
    pub dir: SortDir,
}

impl OrderByItem {
    pub fn asc(path: impl Into<String>) -> Self {
        Self {
            expr: Expr::Identifier(path.into()),
            dir: SortDir::Asc,
        }
    }

    pub fn desc(path: impl Into<String>) -> Self {
        Self {
            expr: Expr::Identifier(path.into()),
            dir: SortDir::Desc,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum AggregateMethod {
    Sum,
    Min,
    Max,
    Average,
}

impl AggregateMethod {
    pub fn name(&self) -> &'static str {
        match self {
            AggregateMethod::Sum => "sum",
            AggregateMethod::Min => "min",
            AggregateMethod::Max => "max",
            AggregateMethod::Average => "average",
        }
    }

    fn parse(raw: &str) -> Option<Self> {
        match raw.to_ascii_lowercase().as_str() {
            "sum" => Some(AggregateMethod::Sum),
            "min" => Some(AggregateMethod::Min),
            "max" => Some(AggregateMethod::Max),
            "average" => Some(AggregateMethod::Average),
            _ => None,
        }
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct AggregateExpr {
    pub path: String,
    pub method: AggregateMethod,
    pub alias: Option<String>,
}

impl AggregateExpr {
    /// Result property name; falls back to the method name.
    pub fn alias_or_method(&self) -> &str {
        self.alias.as_deref().unwrap_or_else(|| self.method.name())
    }
}

/// One transformation of `$apply`.
#[derive(Clone, Debug, PartialEq)]
pub enum ApplyItem {
    Aggregate(Vec<AggregateExpr>),
    GroupBy(Vec<String>),
    Filter(Expr),
    Other(String),
}

impl ApplyItem {
    pub fn kind_name(&self) -> &str {
        match self {
            ApplyItem::Aggregate(_) => "aggregate",
            ApplyItem::GroupBy(_) => "groupby",
            ApplyItem::Filter(_) => "filter",
            ApplyItem::Other(name) => name,
        }
    }
}

/// One `$expand` item. `path` holds the property segments up to and including the
/// navigation property; `star` marks `$expand=*`.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct ExpandItem {
    pub path: Vec<String>,
    pub star: bool,
    pub options: QueryOptions,
}

impl ExpandItem {
    pub fn new(path: &str) -> Self {
        Self {
            path: path.split('/').map(str::to_string).collect(),
            star: false,
            options: QueryOptions::default(),
        }
    }

    pub fn star() -> Self {
        Self {
            path: Vec::new(),
            star: true,
            options: QueryOptions::default(),
        }
    }

    pub fn with_options(mut self, options: QueryOptions) -> Self {
        self.options = options;
        self
    }
}

#[derive(Clone, Debug, Default, PartialEq)]
pub struct QueryOptions {
    pub filter: ODataQuery,
    pub select: Vec<String>,
    pub expand: Vec<ExpandItem>,
    pub orderby: Vec<OrderByItem>,
    pub top: Option<i64>,
    pub skip: Option<i64>,
    pub search: Option<String>,
    pub count: bool,
    pub apply: Vec<ApplyItem>,
}

impl QueryOptions {
    /// `true` when `$select` is absent or contains `*`.
    pub fn selects_all(&self) -> bool {
        self.select.is_empty() || self.select.iter().any(|s| s == "*")
    }

    pub fn has_paging(&self) -> bool {
        self.top.is_some() || self.skip.is_some()
    }
}

/* ---------- option parsers ---------- */

/// Parse `$select`: `Name1,Address/Country` or `*`.
pub fn parse_select(raw: &str) -> Result<Vec<String>, Error> {
    let mut items = Vec::new();
    for part in raw.split(',') {
        let part = part.trim();
        if part.is_empty() {
            continue;
        }
        if part.split('/').any(|s| s.trim().is_empty()) {
            return Err(Error::InvalidSelect(format!("empty path segment in '{part}'")));
        }
        items.push(part.to_string());
    }
    if items.len() > MAX_SELECT_ITEMS {
        return Err(Error::InvalidSelect("too many select items".into()));
    }
    Ok(items)
}

/// Parse `$orderby`: `field1 [asc|desc], Roles/$count desc`.
pub fn parse_orderby(raw: &str) -> Result<Vec<OrderByItem>, Error> {
    let raw = raw.trim();
    if raw.is_empty() {
        return Ok(Vec::new());
    }
    if raw.len() > MAX_ORDERBY_LEN {
        return Err(Error::InvalidOrderBy("orderby too long".into()));
    }

    let mut items = Vec::new();
    for part in raw.split(',') {
        let part = part.trim();
        if part.is_empty() {
            continue;
        }
        let tokens: Vec<&str> = part.split_whitespace().collect();
        let (field, dir) = match tokens.as_slice() {
            [field] => (*field, SortDir::Asc),
            [field, dir] if dir.eq_ignore_ascii_case("asc") => (*field, SortDir::Asc),
            [field, dir] if dir.eq_ignore_ascii_case("desc") => (*field, SortDir::Desc),
            _ => {
                return Err(Error::InvalidOrderBy(format!(
                    "invalid orderby clause: {part}"
                )))
            }
        };
        items.push(OrderByItem {
            expr: Expr::Identifier(field.to_string()),
            dir,
        });
    }

    if items.len() > MAX_ORDER_FIELDS {
        return Err(Error::InvalidOrderBy("too many order fields".into()));
    }
    Ok(items)
}

/// Parse a `$top` or `$skip` value. The sign is checked by the query builder, which
/// reports negative values with the option name.
pub fn parse_count_option(option: &'static str, raw: &str) -> Result<i64, Error> {
    raw.trim()
        .parse::<i64>()
        .map_err(|_| Error::InvalidOptionValue {
            option,
            value: raw.to_string(),
        })
}

/// Parse `$expand`: `Roles($top=2;$orderby=RoleCategory desc),Address/AdminInfo/User,*`.
///
/// Nested `$select`, `$orderby`, `$top`, `$skip`, `$count` and `$expand` are understood;
/// nested `$filter` requires the `with-odata-params` feature.
pub fn parse_expand(raw: &str) -> Result<Vec<ExpandItem>, Error> {
    parse_expand_at(raw, 0)
}

fn parse_expand_at(raw: &str, depth: usize) -> Result<Vec<ExpandItem>, Error> {
    if depth > MAX_EXPAND_DEPTH {
        return Err(Error::InvalidExpand("expand nested too deep".into()));
    }
    let mut items = Vec::new();
    for part in split_outside_parens(raw, ',')? {
        let part = part.trim();
        if part.is_empty() {
            continue;
        }
        let (path, nested) = match part.find('(') {
            Some(open) if part.ends_with(')') => (&part[..open], Some(&part[open + 1..part.len() - 1])),
            Some(_) => return Err(Error::InvalidExpand(format!("unbalanced parentheses in '{part}'"))),
            None => (part, None),
        };
        let mut item = if path.trim() == "*" {
            ExpandItem::star()
        } else {
            ExpandItem::new(path.trim())
        };
        if let Some(nested) = nested {
            item.options = parse_nested_options(nested, depth)?;
        }
        items.push(item);
    }
    Ok(items)
}

fn parse_nested_options(raw: &str, depth: usize) -> Result<QueryOptions, Error> {
    let mut options = QueryOptions::default();
    for part in split_outside_parens(raw, ';')? {
        let part = part.trim();
        if part.is_empty() {
            continue;
        }
        let Some((name, value)) = part.split_once('=') else {
            return Err(Error::InvalidExpand(format!("invalid nested option '{part}'")));
        };
        match name.trim() {
            "$select" => options.select = parse_select(value)?,
            "$orderby" => options.orderby = parse_orderby(value)?,
            "$top" => options.top = Some(parse_count_option("$top", value)?),
            "$skip" => options.skip = Some(parse_count_option("$skip", value)?),
            "$count" => options.count = value.trim().eq_ignore_ascii_case("true"),
            "$expand" => options.expand = parse_expand_at(value, depth + 1)?,
            "$filter" => options.filter = crate::parse_filter(value)?,
            other => {
                return Err(Error::InvalidExpand(format!("unsupported nested option '{other}'")))
            }
        }
    }
    Ok(options)
}

/// Parse `$apply`. Only the `aggregate(...)` transformation is decoded; any other
/// transformation is kept as [`ApplyItem::Other`] so the processor can reject it.
///
/// `aggregate(Amount with sum as Total, Amount with max)`
pub fn parse_apply(raw: &str) -> Result<Vec<ApplyItem>, Error> {
    let mut items = Vec::new();
    for part in split_outside_parens(raw, '/')? {
        let part = part.trim();
        if part.is_empty() {
            continue;
        }
        let Some(open) = part.find('(') else {
            return Err(Error::InvalidApply(format!("missing arguments in '{part}'")));
        };
        if !part.ends_with(')') {
            return Err(Error::InvalidApply(format!("unbalanced parentheses in '{part}'")));
        }
        let name = part[..open].trim();
        let args = &part[open + 1..part.len() - 1];
        if name.eq_ignore_ascii_case("aggregate") {
            let mut exprs = Vec::new();
            for arg in split_outside_parens(args, ',')? {
                exprs.push(parse_aggregate_expr(arg.trim())?);
            }
            items.push(ApplyItem::Aggregate(exprs));
        } else {
            items.push(ApplyItem::Other(name.to_string()));
        }
    }
    Ok(items)
}

fn parse_aggregate_expr(raw: &str) -> Result<AggregateExpr, Error> {
    let tokens: Vec<&str> = raw.split_whitespace().collect();
    let (path, method, alias) = match tokens.as_slice() {
        [path, with, method] if with.eq_ignore_ascii_case("with") => (*path, *method, None),
        [path, with, method, as_kw, alias]
            if with.eq_ignore_ascii_case("with") && as_kw.eq_ignore_ascii_case("as") =>
        {
            (*path, *method, Some(alias.to_string()))
        }
        _ => return Err(Error::InvalidApply(format!("invalid aggregate expression '{raw}'"))),
    };
    let method = AggregateMethod::parse(method)
        .ok_or_else(|| Error::InvalidApply(format!("unsupported aggregate method '{method}'")))?;
    Ok(AggregateExpr {
        path: path.to_string(),
        method,
        alias,
    })
}

/// Split on `sep` at parenthesis depth zero, ignoring quoted literals.
fn split_outside_parens(raw: &str, sep: char) -> Result<Vec<&str>, Error> {
    let mut parts = Vec::new();
    let mut depth = 0usize;
    let mut in_quote = false;
    let mut start = 0;
    for (i, c) in raw.char_indices() {
        match c {
            '\'' => in_quote = !in_quote,
            '(' if !in_quote => depth += 1,
            ')' if !in_quote => {
                depth = depth
                    .checked_sub(1)
                    .ok_or_else(|| Error::InvalidExpand(format!("unbalanced parentheses in '{raw}'")))?;
            }
            c if c == sep && depth == 0 && !in_quote => {
                parts.push(&raw[start..i]);
                start = i + c.len_utf8();
            }
            _ => {}
        }
    }
    if depth != 0 || in_quote {
        return Err(Error::InvalidExpand(format!("unbalanced parentheses in '{raw}'")));
    }
    parts.push(&raw[start..]);
    Ok(parts)
}
