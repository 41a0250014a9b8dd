//! Bindings for the parts of the xterm.js `Terminal` API the client uses.

use js_sys::{Function, Uint8Array};
use wasm_bindgen::prelude::*;
use web_sys::HtmlElement;

#[wasm_bindgen]
extern "C" {
	#[wasm_bindgen(typescript_type = "Terminal")]
	#[derive(Debug, Clone)]
	pub type XTerm;

	#[wasm_bindgen(method, getter)]
	pub fn cols(this: &XTerm) -> u16;

	#[wasm_bindgen(method, getter)]
	pub fn rows(this: &XTerm) -> u16;

	#[wasm_bindgen(method, getter)]
	pub fn options(this: &XTerm) -> JsValue;

	/// `undefined` until the terminal has been opened on an element.
	#[wasm_bindgen(method, getter)]
	pub fn element(this: &XTerm) -> Option<HtmlElement>;

	/// The `IUnicodeHandling` service, holding `activeVersion`.
	#[wasm_bindgen(method, getter)]
	pub fn unicode(this: &XTerm) -> JsValue;

	/// `callback` runs once xterm.js has parsed `data`.
	#[wasm_bindgen(method)]
	pub fn write(this: &XTerm, data: &Uint8Array, callback: &JsValue);

	#[wasm_bindgen(method, js_name = onData)]
	pub fn on_data(this: &XTerm, listener: &Function) -> Disposable;

	#[wasm_bindgen(method, js_name = onResize)]
	pub fn on_resize(this: &XTerm, listener: &Function) -> Disposable;

	#[wasm_bindgen(method)]
	pub fn focus(this: &XTerm);

	#[wasm_bindgen(method)]
	pub fn dispose(this: &XTerm);

	#[derive(Debug, Clone)]
	pub type Disposable;

	#[wasm_bindgen(method, js_name = dispose)]
	pub fn dispose(this: &Disposable);
}
