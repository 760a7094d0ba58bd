//! Registers every canonical verb against the components an
//! `Orchestrator` holds. Kept separate from `lib.rs` so construction and
//! wiring stay distinct concerns, the way the teacher splits transport
//! setup from command handling.

use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;

use base64::engine::general_purpose::STANDARD as BASE64_STANDARD;
use base64::Engine as _;
use serde_json::{json, Value};

use crate::cookies::{HistoryAction, JarOptions, SyncMode};
use crate::dispatch::{required_str, Handler, HandlerFuture};
use crate::error::{Error, Result};
use crate::forms::{FillOptions, FormField};
use crate::interaction::{Dialect, ElementRef, EventType, ExportOptions, RecordingOptions};
use crate::page_host::CookieDetails;
use crate::proxy::ProxyConfigEntry;
use crate::screenshot::ScreenshotManager;
use crate::Orchestrator;

fn wrap<F, Fut>(f: F) -> Handler
where
    F: Fn(Value) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<Value>> + Send + 'static,
{
    Arc::new(move |args: Value| -> HandlerFuture { Box::pin(f(args)) })
}

fn opt_str(args: &Value, name: &str) -> Option<String> {
    args.get(name).and_then(|v| v.as_str()).map(str::to_string)
}

fn opt_f64(args: &Value, name: &str) -> Option<f64> {
    args.get(name).and_then(|v| v.as_f64())
}

fn encode_b64(bytes: &[u8]) -> String {
    BASE64_STANDARD.encode(bytes)
}

/// Builds the currently-focused element context from command args, when
/// the caller supplied one, so keyboard events on password/email fields
/// reach `record_key`'s masking check.
fn element_ref_from_args(args: &Value) -> Option<ElementRef> {
    let selector = opt_str(args, "selector");
    let element_type = opt_str(args, "elementType");
    let name = opt_str(args, "name");
    if selector.is_none() && element_type.is_none() && name.is_none() {
        None
    } else {
        Some(ElementRef { selector, element_type, name })
    }
}

/// Registers every verb in `dispatch::CANONICAL_VERBS` (plus its
/// `browser_*` alias, handled by `CommandRegistry::register` itself).
pub async fn install(orchestrator: &Orchestrator) {
    let registry = &orchestrator.registry;

    registry.register("ping", wrap(|_| async { Ok(json!({ "pong": true })) })).await;

    {
        let pool = Arc::clone(&orchestrator.pool);
        let pages = Arc::clone(&orchestrator.pages);
        let proxies = Arc::clone(&orchestrator.proxies);
        registry
            .register(
                "status",
                wrap(move |_| {
                    let pool = Arc::clone(&pool);
                    let pages = Arc::clone(&pages);
                    let proxies = Arc::clone(&proxies);
                    async move {
                        let pool_status = pool.status().await;
                        let page_count = pages.list_pages().await.len();
                        let proxy_count = proxies.list().await.len();
                        Ok(json!({ "pool": pool_status, "pages": page_count, "proxies": proxy_count }))
                    }
                }),
            )
            .await;
    }

    {
        let pages = Arc::clone(&orchestrator.pages);
        registry
            .register(
                "navigate",
                wrap(move |args| {
                    let pages = Arc::clone(&pages);
                    async move {
                        let page_id = required_str(&args, "pageId")?;
                        let url = required_str(&args, "url")?;
                        pages.navigate_page(&page_id, &url).await?;
                        Ok(json!({ "navigated": true, "url": url }))
                    }
                }),
            )
            .await;
    }

    {
        let pages = Arc::clone(&orchestrator.pages);
        let interaction = Arc::clone(&orchestrator.interaction);
        registry
            .register(
                "click",
                wrap(move |args| {
                    let pages = Arc::clone(&pages);
                    let interaction = Arc::clone(&interaction);
                    async move {
                        let page_id = required_str(&args, "pageId")?;
                        let x = opt_f64(&args, "x").unwrap_or(0.0);
                        let y = opt_f64(&args, "y").unwrap_or(0.0);
                        let selector = opt_str(&args, "selector");
                        let element = selector
                            .clone()
                            .map(|s| ElementRef { selector: Some(s), element_type: None, name: None });
                        interaction.record_click(x, y, element).await;
                        let script = match &selector {
                            Some(sel) => format!("document.querySelector({sel:?})?.click()"),
                            None => format!("document.elementFromPoint({x},{y})?.click()"),
                        };
                        let result = pages.execute_on_page(&page_id, &script).await?;
                        Ok(json!({ "clicked": true, "result": result }))
                    }
                }),
            )
            .await;
    }

    {
        let pages = Arc::clone(&orchestrator.pages);
        registry
            .register(
                "fill",
                wrap(move |args| {
                    let pages = Arc::clone(&pages);
                    async move {
                        let page_id = required_str(&args, "pageId")?;
                        let fields: Vec<FormField> = serde_json::from_value(
                            args.get("fields").cloned().ok_or_else(|| Error::ArgumentMissing("fields".into()))?,
                        )?;
                        let data: HashMap<String, String> = serde_json::from_value(
                            args.get("data").cloned().ok_or_else(|| Error::ArgumentMissing("data".into()))?,
                        )?;
                        let options: FillOptions = args
                            .get("options")
                            .cloned()
                            .map(serde_json::from_value)
                            .transpose()?
                            .unwrap_or_default();
                        let outcomes = crate::forms::plan_fill(&fields, &data, &options)?;
                        for (field, outcome) in fields.iter().zip(outcomes.iter()) {
                            if !outcome.filled {
                                continue;
                            }
                            let value = data
                                .get(&field.name)
                                .or_else(|| data.get(&field.selector))
                                .cloned()
                                .unwrap_or_default();
                            let script = format!(
                                "document.querySelector({:?}).value = {:?}",
                                outcome.selector, value
                            );
                            pages.execute_on_page(&page_id, &script).await.ok();
                        }
                        Ok(serde_json::to_value(outcomes)?)
                    }
                }),
            )
            .await;
    }

    {
        let pages = Arc::clone(&orchestrator.pages);
        let interaction = Arc::clone(&orchestrator.interaction);
        registry
            .register(
                "type_text",
                wrap(move |args| {
                    let pages = Arc::clone(&pages);
                    let interaction = Arc::clone(&interaction);
                    async move {
                        let page_id = required_str(&args, "pageId")?;
                        let selector = required_str(&args, "selector")?;
                        let text = required_str(&args, "text")?;
                        let element = ElementRef { selector: Some(selector.clone()), element_type: None, name: None };
                        interaction.record_input(element, &text).await;
                        let script = format!("document.querySelector({selector:?}).value = {text:?}");
                        pages.execute_on_page(&page_id, &script).await?;
                        Ok(json!({ "typed": true }))
                    }
                }),
            )
            .await;
    }

    {
        let pages = Arc::clone(&orchestrator.pages);
        registry
            .register(
                "execute_script",
                wrap(move |args| {
                    let pages = Arc::clone(&pages);
                    async move {
                        let page_id = required_str(&args, "pageId")?;
                        let code = required_str(&args, "code")?;
                        let result = pages.execute_on_page(&page_id, &code).await?;
                        Ok(json!({ "result": result }))
                    }
                }),
            )
            .await;
    }

    {
        let pages = Arc::clone(&orchestrator.pages);
        registry
            .register(
                "wait_for_element",
                wrap(move |args| {
                    let pages = Arc::clone(&pages);
                    async move {
                        let page_id = required_str(&args, "pageId")?;
                        let selector = required_str(&args, "selector")?;
                        let script = format!("document.querySelector({selector:?}) !== null");
                        let found = pages.execute_on_page(&page_id, &script).await?;
                        Ok(json!({ "found": found }))
                    }
                }),
            )
            .await;
    }

    {
        let pages = Arc::clone(&orchestrator.pages);
        registry
            .register(
                "get_cookies",
                wrap(move |args| {
                    let pages = Arc::clone(&pages);
                    async move {
                        let page_id = required_str(&args, "pageId")?;
                        let host = pages.get_host(&page_id).await?;
                        let domain = opt_str(&args, "domain");
                        let name = opt_str(&args, "name");
                        let cookies = host
                            .get_cookies(crate::page_host::CookieFilter { domain, name })
                            .await?;
                        Ok(serde_json::to_value(cookies)?)
                    }
                }),
            )
            .await;
    }

    {
        let pages = Arc::clone(&orchestrator.pages);
        let cookies = Arc::clone(&orchestrator.cookies);
        registry
            .register(
                "set_cookies",
                wrap(move |args| {
                    let pages = Arc::clone(&pages);
                    let cookies = Arc::clone(&cookies);
                    async move {
                        let page_id = required_str(&args, "pageId")?;
                        let host = pages.get_host(&page_id).await?;
                        let details: Vec<CookieDetails> = serde_json::from_value(
                            args.get("cookies").cloned().ok_or_else(|| Error::ArgumentMissing("cookies".into()))?,
                        )?;
                        for cookie in details {
                            host.set_cookie(cookie.clone()).await?;
                            cookies.record_history(HistoryAction::Created, &cookie.name, &cookie.domain).await;
                        }
                        Ok(json!({ "set": true }))
                    }
                }),
            )
            .await;
    }

    {
        let pages = Arc::clone(&orchestrator.pages);
        registry
            .register(
                "clear_cookies",
                wrap(move |args| {
                    let pages = Arc::clone(&pages);
                    async move {
                        let page_id = required_str(&args, "pageId")?;
                        let host = pages.get_host(&page_id).await?;
                        let existing = host.get_cookies(crate::page_host::CookieFilter::default()).await?;
                        for cookie in &existing {
                            host.remove_cookie(&cookie.domain, &cookie.name).await?;
                        }
                        Ok(json!({ "cleared": existing.len() }))
                    }
                }),
            )
            .await;
    }

    {
        let proxies = Arc::clone(&orchestrator.proxies);
        registry
            .register(
                "set_proxy",
                wrap(move |args| {
                    let proxies = Arc::clone(&proxies);
                    async move {
                        // The envelope's own "id" field swallows a top-level "id" key, so a
                        // proxy config entry (which also has an "id") is nested under "proxy".
                        let entry: ProxyConfigEntry = serde_json::from_value(
                            args.get("proxy").cloned().ok_or_else(|| Error::ArgumentMissing("proxy".into()))?,
                        )?;
                        let id = entry.id.clone();
                        let _ = proxies.remove_proxy(&id).await;
                        let proxy = proxies.add_proxy(entry).await?;
                        Ok(serde_json::to_value(proxy)?)
                    }
                }),
            )
            .await;
    }

    {
        let proxies = Arc::clone(&orchestrator.proxies);
        registry
            .register(
                "get_proxy_status",
                wrap(move |_| {
                    let proxies = Arc::clone(&proxies);
                    async move { Ok(serde_json::to_value(proxies.list().await)?) }
                }),
            )
            .await;
    }

    {
        let proxies = Arc::clone(&orchestrator.proxies);
        registry
            .register(
                "set_proxy_list",
                wrap(move |args| {
                    let proxies = Arc::clone(&proxies);
                    async move {
                        let entries: Vec<ProxyConfigEntry> = serde_json::from_value(
                            args.get("proxies").cloned().ok_or_else(|| Error::ArgumentMissing("proxies".into()))?,
                        )?;
                        proxies.clear().await;
                        for entry in entries {
                            proxies.add_proxy(entry).await?;
                        }
                        Ok(json!({ "count": proxies.list().await.len() }))
                    }
                }),
            )
            .await;
    }

    {
        let pages = Arc::clone(&orchestrator.pages);
        registry
            .register(
                "screenshot_viewport",
                wrap(move |args| {
                    let pages = Arc::clone(&pages);
                    async move {
                        let page_id = required_str(&args, "pageId")?;
                        let host = pages.get_host(&page_id).await?;
                        let (bytes, meta) = ScreenshotManager::capture_viewport(&host).await?;
                        Ok(json!({ "data": encode_b64(&bytes), "metadata": meta }))
                    }
                }),
            )
            .await;
    }

    {
        let pages = Arc::clone(&orchestrator.pages);
        registry
            .register(
                "screenshot_full_page",
                wrap(move |args| {
                    let pages = Arc::clone(&pages);
                    async move {
                        let page_id = required_str(&args, "pageId")?;
                        let host = pages.get_host(&page_id).await?;
                        let (bytes, meta) = ScreenshotManager::capture_full_page(&host, 0, None).await?;
                        Ok(json!({ "data": encode_b64(&bytes), "metadata": meta }))
                    }
                }),
            )
            .await;
    }

    {
        let pages = Arc::clone(&orchestrator.pages);
        registry
            .register(
                "screenshot_highlights",
                wrap(move |args| {
                    let pages = Arc::clone(&pages);
                    async move {
                        let page_id = required_str(&args, "pageId")?;
                        let selectors: Vec<String> = args
                            .get("selectors")
                            .cloned()
                            .map(serde_json::from_value)
                            .transpose()?
                            .unwrap_or_default();
                        let options: crate::screenshot::HighlightOptions = args
                            .get("options")
                            .cloned()
                            .map(serde_json::from_value)
                            .transpose()?
                            .unwrap_or_default();
                        let host = pages.get_host(&page_id).await?;
                        let (bytes, meta) =
                            ScreenshotManager::capture_with_highlights(&host, &selectors, &options).await?;
                        Ok(json!({ "data": encode_b64(&bytes), "metadata": meta }))
                    }
                }),
            )
            .await;
    }

    {
        let pages = Arc::clone(&orchestrator.pages);
        registry
            .register(
                "screenshot_blur",
                wrap(move |args| {
                    let pages = Arc::clone(&pages);
                    async move {
                        let page_id = required_str(&args, "pageId")?;
                        let options: crate::screenshot::BlurOptions = args
                            .get("options")
                            .cloned()
                            .map(serde_json::from_value)
                            .transpose()?
                            .unwrap_or_default();
                        let host = pages.get_host(&page_id).await?;
                        let (bytes, meta) = ScreenshotManager::capture_with_blur(&host, &options).await?;
                        Ok(json!({ "data": encode_b64(&bytes), "metadata": meta }))
                    }
                }),
            )
            .await;
    }

    {
        let pages = Arc::clone(&orchestrator.pages);
        registry
            .register(
                "screenshot_ocr",
                wrap(move |args| {
                    let pages = Arc::clone(&pages);
                    async move {
                        let page_id = required_str(&args, "pageId")?;
                        let options: crate::screenshot::OcrOptions = args
                            .get("options")
                            .cloned()
                            .map(serde_json::from_value)
                            .transpose()?
                            .unwrap_or_default();
                        let host = pages.get_host(&page_id).await?;
                        let result = ScreenshotManager::extract_text_from_screenshot(&host, &options).await?;
                        Ok(json!({ "text": result.text, "overlay": result.overlay.as_deref().map(encode_b64) }))
                    }
                }),
            )
            .await;
    }

    {
        let pages = Arc::clone(&orchestrator.pages);
        registry
            .register(
                "screenshot_scrolling",
                wrap(move |args| {
                    let pages = Arc::clone(&pages);
                    async move {
                        let page_id = required_str(&args, "pageId")?;
                        let step = opt_f64(&args, "step").unwrap_or(800.0) as u32;
                        let delay_ms = opt_f64(&args, "delayMs").unwrap_or(0.0) as u64;
                        let host = pages.get_host(&page_id).await?;
                        let (bytes, meta) = ScreenshotManager::capture_scrolling(&host, step, delay_ms).await?;
                        Ok(json!({ "data": encode_b64(&bytes), "metadata": meta }))
                    }
                }),
            )
            .await;
    }

    {
        let interaction = Arc::clone(&orchestrator.interaction);
        registry
            .register(
                "recording_start",
                wrap(move |args| {
                    let interaction = Arc::clone(&interaction);
                    async move {
                        let name = required_str(&args, "name")?;
                        let start_url = required_str(&args, "startUrl")?;
                        let description = opt_str(&args, "description");
                        let options: RecordingOptions = args
                            .get("options")
                            .cloned()
                            .map(serde_json::from_value)
                            .transpose()?
                            .unwrap_or_default();
                        interaction.start(&name, description.as_deref(), &start_url, options).await?;
                        Ok(json!({ "recording": true }))
                    }
                }),
            )
            .await;
    }

    {
        let interaction = Arc::clone(&orchestrator.interaction);
        registry
            .register(
                "recording_stop",
                wrap(move |args| {
                    let interaction = Arc::clone(&interaction);
                    async move {
                        let session = interaction.stop().await?;
                        let dialect = match opt_str(&args, "format").as_deref() {
                            Some("selenium") => Dialect::Selenium,
                            Some("puppeteer") => Dialect::Puppeteer,
                            Some("playwright") => Dialect::Playwright,
                            _ => Dialect::Json,
                        };
                        let script = crate::interaction::export_recording(&session, dialect, &ExportOptions::default())?;
                        Ok(json!({ "hash": session.hash, "export": script }))
                    }
                }),
            )
            .await;
    }

    {
        let pages = Arc::clone(&orchestrator.pages);
        registry
            .register(
                "list_sessions",
                wrap(move |_| {
                    let pages = Arc::clone(&pages);
                    async move { Ok(serde_json::to_value(pages.list_pages().await)?) }
                }),
            )
            .await;
    }

    {
        let pages = Arc::clone(&orchestrator.pages);
        registry
            .register(
                "get_session_info",
                wrap(move |args| {
                    let pages = Arc::clone(&pages);
                    async move {
                        let page_id = required_str(&args, "pageId")?;
                        Ok(serde_json::to_value(pages.get_page(&page_id).await?)?)
                    }
                }),
            )
            .await;
    }

    {
        let pages = Arc::clone(&orchestrator.pages);
        registry
            .register(
                "list_tabs",
                wrap(move |_| {
                    let pages = Arc::clone(&pages);
                    async move { Ok(serde_json::to_value(pages.list_pages().await)?) }
                }),
            )
            .await;
    }

    {
        let pages = Arc::clone(&orchestrator.pages);
        registry
            .register(
                "navigate_tab",
                wrap(move |args| {
                    let pages = Arc::clone(&pages);
                    async move {
                        let page_id = required_str(&args, "pageId")?;
                        let url = required_str(&args, "url")?;
                        pages.navigate_page(&page_id, &url).await?;
                        Ok(json!({ "navigated": true }))
                    }
                }),
            )
            .await;
    }

    {
        let pages = Arc::clone(&orchestrator.pages);
        registry
            .register(
                "close_tab",
                wrap(move |args| {
                    let pages = Arc::clone(&pages);
                    async move {
                        let page_id = required_str(&args, "pageId")?;
                        pages.destroy_page(&page_id).await?;
                        Ok(json!({ "closed": true }))
                    }
                }),
            )
            .await;
    }

    {
        let pages = Arc::clone(&orchestrator.pages);
        registry
            .register(
                "get_active_tab",
                wrap(move |_| {
                    let pages = Arc::clone(&pages);
                    async move {
                        let pages = pages.list_pages().await;
                        Ok(json!({ "pages": pages }))
                    }
                }),
            )
            .await;
    }

    {
        let interaction = Arc::clone(&orchestrator.interaction);
        registry
            .register(
                "key_press",
                wrap(move |args| {
                    let interaction = Arc::clone(&interaction);
                    async move {
                        let key = required_str(&args, "key")?;
                        let element = element_ref_from_args(&args);
                        interaction.record_key(EventType::KeyDown, &key, element).await;
                        Ok(json!({ "pressed": key }))
                    }
                }),
            )
            .await;
    }

    {
        let interaction = Arc::clone(&orchestrator.interaction);
        registry
            .register(
                "key_combination",
                wrap(move |args| {
                    let interaction = Arc::clone(&interaction);
                    async move {
                        let keys = required_str(&args, "keys")?;
                        let element = element_ref_from_args(&args);
                        interaction.record_key(EventType::KeyDown, &keys, element).await;
                        Ok(json!({ "pressed": keys }))
                    }
                }),
            )
            .await;
    }

    {
        let interaction = Arc::clone(&orchestrator.interaction);
        registry
            .register(
                "mouse_move",
                wrap(move |args| {
                    let interaction = Arc::clone(&interaction);
                    async move {
                        let x = opt_f64(&args, "x").unwrap_or(0.0);
                        let y = opt_f64(&args, "y").unwrap_or(0.0);
                        interaction.record_mouse_move(x, y).await;
                        Ok(json!({ "moved": true }))
                    }
                }),
            )
            .await;
    }

    {
        let interaction = Arc::clone(&orchestrator.interaction);
        registry
            .register(
                "mouse_click",
                wrap(move |args| {
                    let interaction = Arc::clone(&interaction);
                    async move {
                        let x = opt_f64(&args, "x").unwrap_or(0.0);
                        let y = opt_f64(&args, "y").unwrap_or(0.0);
                        interaction.record_click(x, y, None).await;
                        Ok(json!({ "clicked": true }))
                    }
                }),
            )
            .await;
    }

    {
        let interaction = Arc::clone(&orchestrator.interaction);
        registry
            .register(
                "mouse_drag",
                wrap(move |args| {
                    let interaction = Arc::clone(&interaction);
                    async move {
                        let from_x = opt_f64(&args, "fromX").unwrap_or(0.0);
                        let from_y = opt_f64(&args, "fromY").unwrap_or(0.0);
                        let to_x = opt_f64(&args, "toX").unwrap_or(0.0);
                        let to_y = opt_f64(&args, "toY").unwrap_or(0.0);
                        interaction.record_click(from_x, from_y, None).await;
                        interaction.record_mouse_move(to_x, to_y).await;
                        Ok(json!({ "dragged": true }))
                    }
                }),
            )
            .await;
    }

    {
        let pages = Arc::clone(&orchestrator.pages);
        let interaction = Arc::clone(&orchestrator.interaction);
        registry
            .register(
                "click_at_element",
                wrap(move |args| {
                    let pages = Arc::clone(&pages);
                    let interaction = Arc::clone(&interaction);
                    async move {
                        let page_id = required_str(&args, "pageId")?;
                        let selector = required_str(&args, "selector")?;
                        let element = ElementRef { selector: Some(selector.clone()), element_type: None, name: None };
                        interaction.record_click(0.0, 0.0, Some(element)).await;
                        let script = format!("document.querySelector({selector:?})?.click()");
                        pages.execute_on_page(&page_id, &script).await?;
                        Ok(json!({ "clicked": true }))
                    }
                }),
            )
            .await;
    }

    registry
        .register(
            "keyboard_layouts",
            wrap(|_| async { Ok(json!(["qwerty", "azerty", "qwertz", "dvorak"])) }),
        )
        .await;

    registry
        .register(
            "special_keys",
            wrap(|_| async {
                Ok(json!([
                    "Enter", "Tab", "Escape", "Backspace", "Delete", "ArrowUp", "ArrowDown", "ArrowLeft", "ArrowRight",
                    "Home", "End", "PageUp", "PageDown", "Shift", "Control", "Alt", "Meta"
                ]))
            }),
        )
        .await;

    {
        let identity = Arc::clone(&orchestrator.identity);
        registry
            .register(
                "list_sock_puppets",
                wrap(move |args| {
                    let identity = Arc::clone(&identity);
                    async move {
                        let query = opt_str(&args, "query").unwrap_or_default();
                        let puppets = identity.search_entities(&query).await?;
                        Ok(serde_json::to_value(puppets)?)
                    }
                }),
            )
            .await;
    }

    // Cookie jar and evidence management ride alongside the canonical
    // verb set as additional open-registry commands (DESIGN.md Open
    // Question 2), not in CANONICAL_VERBS itself.
    {
        let cookies = Arc::clone(&orchestrator.cookies);
        registry
            .register(
                "create_cookie_jar",
                wrap(move |args| {
                    let cookies = Arc::clone(&cookies);
                    async move {
                        let name = required_str(&args, "name")?;
                        cookies.create_jar(&name, JarOptions::default()).await?;
                        Ok(json!({ "created": name }))
                    }
                }),
            )
            .await;
    }

    {
        let cookies = Arc::clone(&orchestrator.cookies);
        registry
            .register(
                "switch_cookie_jar",
                wrap(move |args| {
                    let cookies = Arc::clone(&cookies);
                    async move {
                        let name = required_str(&args, "name")?;
                        cookies.switch_jar(&name, true, true).await?;
                        Ok(json!({ "active": name }))
                    }
                }),
            )
            .await;
    }

    {
        let cookies = Arc::clone(&orchestrator.cookies);
        registry
            .register(
                "sync_cookie_jars",
                wrap(move |args| {
                    let cookies = Arc::clone(&cookies);
                    async move {
                        let src = required_str(&args, "src")?;
                        let dst = required_str(&args, "dst")?;
                        let mode = match opt_str(&args, "mode").as_deref() {
                            Some("replace") => SyncMode::Replace,
                            _ => SyncMode::Merge,
                        };
                        let result = cookies.sync_jars(&src, &dst, mode, None::<fn(&CookieDetails) -> bool>).await?;
                        Ok(json!({ "added": result.added, "updated": result.updated, "skipped": result.skipped }))
                    }
                }),
            )
            .await;
    }

    {
        let evidence = Arc::clone(&orchestrator.evidence);
        registry
            .register(
                "collect_evidence",
                wrap(move |args| {
                    let evidence = Arc::clone(&evidence);
                    async move {
                        let item_type = required_str(&args, "itemType")?;
                        let data = args.get("data").cloned().unwrap_or(Value::Null);
                        let actor = required_str(&args, "actor")?;
                        let case_id = opt_str(&args, "caseId");
                        let investigation_id = opt_str(&args, "investigationId");
                        let item = evidence.collect_evidence(&item_type, data, &actor, case_id, investigation_id).await?;
                        Ok(serde_json::to_value(item)?)
                    }
                }),
            )
            .await;
    }

    {
        let evidence = Arc::clone(&orchestrator.evidence);
        registry
            .register(
                "export_evidence_package",
                wrap(move |args| {
                    let evidence = Arc::clone(&evidence);
                    async move {
                        let package_id = required_str(&args, "packageId")?;
                        let format = opt_str(&args, "format").unwrap_or_else(|| "json".to_string());
                        let include_audit = args.get("includeAudit").and_then(|v| v.as_bool()).unwrap_or(false);
                        let report = evidence.export_package(&package_id, &format, include_audit).await?;
                        Ok(json!({ "report": report }))
                    }
                }),
            )
            .await;
    }

    {
        let evidence = Arc::clone(&orchestrator.evidence);
        registry
            .register(
                "export_audit_log",
                wrap(move |args| {
                    let evidence = Arc::clone(&evidence);
                    async move {
                        let investigation_id = opt_str(&args, "investigationId");
                        let path = evidence.export_audit_log(investigation_id.as_deref()).await?;
                        Ok(json!({ "path": path.to_string_lossy() }))
                    }
                }),
            )
            .await;
    }
}
