//! `POST /dom/*`: DOM inspection and mutation.
//!
//! Every op shares the same selection contract: a CSS `selector`, an
//! optional `text` refinement (exact string or `/pattern/flags`), and
//! `all` deciding whether more than one match is an error. Selection and
//! most mutations run as one injected script; `set-file` goes through
//! the CDP DOM domain because file inputs cannot be filled from JS.

use argus_cdp::CdpSession;
use serde::Deserialize;
use serde_json::{json, Value};

use crate::error::WatcherError;
use crate::ops::{eval_json, OP_TIMEOUT};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DomOp {
    Tree,
    Info,
    Hover,
    Click,
    Keydown,
    Add,
    Remove,
    Modify,
    SetFile,
    Focus,
    Fill,
    Scroll,
    ScrollTo,
}

impl DomOp {
    pub fn from_path(segment: &str) -> Option<Self> {
        Some(match segment {
            "tree" => Self::Tree,
            "info" => Self::Info,
            "hover" => Self::Hover,
            "click" => Self::Click,
            "keydown" => Self::Keydown,
            "add" => Self::Add,
            "remove" => Self::Remove,
            "modify" => Self::Modify,
            "set-file" => Self::SetFile,
            "focus" => Self::Focus,
            "fill" => Self::Fill,
            "scroll" => Self::Scroll,
            "scroll-to" => Self::ScrollTo,
            _ => return None,
        })
    }
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DomRequest {
    pub selector: String,
    #[serde(default)]
    pub all: bool,
    #[serde(default)]
    pub text: Option<String>,
    /// `fill` value or `modify` attribute value.
    #[serde(default)]
    pub value: Option<String>,
    /// `keydown` key name.
    #[serde(default)]
    pub key: Option<String>,
    /// `add` / `modify` markup.
    #[serde(default)]
    pub html: Option<String>,
    /// `add` insertion position (`beforebegin`, `afterbegin`,
    /// `beforeend`, `afterend`); default `beforeend`.
    #[serde(default)]
    pub position: Option<String>,
    /// `modify` attribute name.
    #[serde(default)]
    pub attribute: Option<String>,
    /// `set-file` absolute paths.
    #[serde(default)]
    pub files: Option<Vec<String>>,
    /// `scroll` deltas.
    #[serde(default)]
    pub dx: Option<f64>,
    #[serde(default)]
    pub dy: Option<f64>,
    /// `tree` depth bound.
    #[serde(default)]
    pub depth: Option<u32>,
}

pub async fn dom_op(
    session: &CdpSession,
    op: DomOp,
    req: DomRequest,
) -> Result<Value, WatcherError> {
    if req.selector.trim().is_empty() {
        return Err(WatcherError::validation("selector is required"));
    }
    if op == DomOp::SetFile {
        return set_file(session, &req).await;
    }

    let body = op_body(op, &req)?;
    let script = build_script(&req, op == DomOp::Tree, &body);
    let result = eval_json(session, &script).await?;
    map_script_error(result)
}

/// Shared selection prologue; `op_body` runs once per selected element
/// with `el` in scope and pushes into `results`.
fn build_script(req: &DomRequest, include_tree_helper: bool, op_body: &str) -> String {
    let selector = json_str(&req.selector);
    let text = req
        .text
        .as_deref()
        .map(json_str)
        .unwrap_or_else(|| "null".to_owned());
    let all = if req.all { "true" } else { "false" };
    let tree_helper = if include_tree_helper {
        TREE_HELPER
    } else {
        ""
    };

    format!(
        r#"(() => {{
  const selector = {selector};
  const textFilter = {text};
  const all = {all};
  {tree_helper}
  let nodes;
  try {{ nodes = Array.from(document.querySelectorAll(selector)); }}
  catch (e) {{ return {{ error: "bad_selector", message: String(e) }}; }}
  if (textFilter !== null) {{
    let pred;
    const slash = textFilter.lastIndexOf('/');
    if (textFilter.length > 1 && textFilter[0] === '/' && slash > 0) {{
      let re;
      try {{ re = new RegExp(textFilter.slice(1, slash), textFilter.slice(slash + 1)); }}
      catch (e) {{ return {{ error: "bad_selector", message: String(e) }}; }}
      pred = (el) => re.test(el.textContent || '');
    }} else {{
      pred = (el) => (el.textContent || '').trim() === textFilter;
    }}
    nodes = nodes.filter(pred);
  }}
  if (nodes.length === 0) return {{ matches: 0, affected: 0, results: [] }};
  if (!all && nodes.length > 1) return {{ error: "multiple_matches", matches: nodes.length }};
  const targets = all ? nodes : [nodes[0]];
  const results = [];
  for (const el of targets) {{
    {op_body}
  }}
  return {{ matches: nodes.length, affected: targets.length, results }};
}})()"#
    )
}

const TREE_HELPER: &str = r#"
  const describeTree = (el, depth) => {
    const node = {
      tag: el.tagName ? el.tagName.toLowerCase() : String(el.nodeName),
      id: el.id || null,
      classes: el.classList ? Array.from(el.classList) : [],
    };
    if (depth > 0 && el.children && el.children.length > 0) {
      node.children = Array.from(el.children).map((c) => describeTree(c, depth - 1));
    }
    return node;
  };
"#;

const INTERACTABLE_CHECK: &str = r#"
    const rect = el.getBoundingClientRect();
    if (rect.width <= 0 || rect.height <= 0) return { error: "not_interactable" };
"#;

fn op_body(op: DomOp, req: &DomRequest) -> Result<String, WatcherError> {
    Ok(match op {
        DomOp::Tree => {
            let depth = req.depth.unwrap_or(5);
            format!("results.push(describeTree(el, {depth}));")
        }
        DomOp::Info => r#"
    const rect = el.getBoundingClientRect();
    results.push({
      tag: el.tagName.toLowerCase(),
      id: el.id || null,
      classes: Array.from(el.classList),
      rect: { x: rect.x, y: rect.y, width: rect.width, height: rect.height },
      visible: rect.width > 0 && rect.height > 0,
      text: (el.textContent || '').trim().slice(0, 200),
    });"#
            .to_owned(),
        DomOp::Click => format!("{INTERACTABLE_CHECK}    el.click();\n    results.push({{ clicked: true }});"),
        DomOp::Hover => format!(
            r#"{INTERACTABLE_CHECK}
    el.dispatchEvent(new MouseEvent('mouseenter', {{ bubbles: false }}));
    el.dispatchEvent(new MouseEvent('mouseover', {{ bubbles: true }}));
    results.push({{ hovered: true }});"#
        ),
        DomOp::Keydown => {
            let key = req
                .key
                .as_deref()
                .ok_or_else(|| WatcherError::validation("key is required for keydown"))?;
            let key = json_str(key);
            format!(
                r#"{INTERACTABLE_CHECK}
    el.dispatchEvent(new KeyboardEvent('keydown', {{ key: {key}, bubbles: true }}));
    el.dispatchEvent(new KeyboardEvent('keyup', {{ key: {key}, bubbles: true }}));
    results.push({{ key: {key} }});"#
            )
        }
        DomOp::Add => {
            let html = req
                .html
                .as_deref()
                .ok_or_else(|| WatcherError::validation("html is required for add"))?;
            let html = json_str(html);
            let position = json_str(req.position.as_deref().unwrap_or("beforeend"));
            format!(
                r#"
    try {{ el.insertAdjacentHTML({position}, {html}); }}
    catch (e) {{ return {{ error: "bad_selector", message: String(e) }}; }}
    results.push({{ added: true }});"#
            )
        }
        DomOp::Remove => "el.remove();\n    results.push({ removed: true });".to_owned(),
        DomOp::Modify => {
            if let Some(attribute) = req.attribute.as_deref() {
                let attribute = json_str(attribute);
                let value = json_str(req.value.as_deref().unwrap_or(""));
                format!(
                    "el.setAttribute({attribute}, {value});\n    results.push({{ modified: true }});"
                )
            } else if let Some(html) = req.html.as_deref() {
                let html = json_str(html);
                format!("el.innerHTML = {html};\n    results.push({{ modified: true }});")
            } else {
                return Err(WatcherError::validation(
                    "modify requires attribute or html",
                ));
            }
        }
        DomOp::Focus => format!("{INTERACTABLE_CHECK}    el.focus();\n    results.push({{ focused: true }});"),
        DomOp::Fill => {
            let value = req
                .value
                .as_deref()
                .ok_or_else(|| WatcherError::validation("value is required for fill"))?;
            let value = json_str(value);
            format!(
                r#"{INTERACTABLE_CHECK}
    el.focus();
    el.value = {value};
    el.dispatchEvent(new Event('input', {{ bubbles: true }}));
    el.dispatchEvent(new Event('change', {{ bubbles: true }}));
    results.push({{ filled: true }});"#
            )
        }
        DomOp::Scroll => {
            let dx = req.dx.unwrap_or(0.0);
            let dy = req.dy.unwrap_or(0.0);
            format!("el.scrollBy({dx}, {dy});\n    results.push({{ scrolled: true }});")
        }
        DomOp::ScrollTo => {
            "el.scrollIntoView({ block: 'center', inline: 'nearest' });\n    results.push({ scrolledTo: true });"
                .to_owned()
        }
        DomOp::SetFile => unreachable!("set-file is dispatched separately"),
    })
}

/// `DOM.setFileInputFiles` needs a backend node, so this op resolves the
/// selector through the DOM domain instead of injected JS.
async fn set_file(session: &CdpSession, req: &DomRequest) -> Result<Value, WatcherError> {
    let files = req
        .files
        .as_ref()
        .filter(|files| !files.is_empty())
        .ok_or_else(|| WatcherError::validation("files is required for set-file"))?;

    let document = session
        .send_and_wait("DOM.getDocument", Some(json!({"depth": 0})), OP_TIMEOUT)
        .await?;
    let root_id = document["root"]["nodeId"]
        .as_i64()
        .ok_or_else(|| WatcherError::Internal("DOM.getDocument returned no root".into()))?;

    let found = session
        .send_and_wait(
            "DOM.querySelector",
            Some(json!({"nodeId": root_id, "selector": req.selector})),
            OP_TIMEOUT,
        )
        .await?;
    let node_id = found["nodeId"].as_i64().unwrap_or(0);
    if node_id == 0 {
        return Ok(json!({"matches": 0, "affected": 0, "results": []}));
    }

    session
        .send_and_wait(
            "DOM.setFileInputFiles",
            Some(json!({"files": files, "nodeId": node_id})),
            OP_TIMEOUT,
        )
        .await?;
    Ok(json!({
        "matches": 1,
        "affected": 1,
        "results": [{"filesSet": files.len()}],
    }))
}

fn map_script_error(result: Value) -> Result<Value, WatcherError> {
    let Some(error) = result.get("error").and_then(Value::as_str) else {
        return Ok(result);
    };
    match error {
        "multiple_matches" => Err(WatcherError::MultipleMatches {
            matches: result.get("matches").and_then(Value::as_u64).unwrap_or(0) as usize,
        }),
        "not_interactable" => Err(WatcherError::NotInteractable),
        "bad_selector" => Err(WatcherError::validation(
            result
                .get("message")
                .and_then(Value::as_str)
                .unwrap_or("invalid selector"),
        )),
        other => Err(WatcherError::Internal(format!("dom op failed: {other}"))),
    }
}

fn json_str(s: &str) -> String {
    serde_json::to_string(s).unwrap_or_else(|_| "\"\"".to_owned())
}
