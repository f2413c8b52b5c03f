//! Procedural macros for the lambda-loop runtime.
//!
//! This crate provides the `#[handler]` attribute macro, which turns an
//! `async fn(Value, Context) -> Result<Value, HandlerError>` into a type
//! implementing `lambda_loop::Handler`.
//!
//! # Example
//!
//! ```ignore
//! use lambda_loop::prelude::*;
//! use serde_json::{json, Value};
//!
//! #[handler(name = "echo")]
//! async fn echo(event: Value, ctx: Context) -> Result<Value, HandlerError> {
//!     Ok(json!({ "event": event, "request_id": ctx.aws_request_id }))
//! }
//! ```

use proc_macro::TokenStream;
use quote::{format_ident, quote};
use syn::{parse_macro_input, punctuated::Punctuated, Expr, ExprLit, ItemFn, Lit, Meta, Token};

/// Attributes for the `#[handler]` macro.
#[derive(Default, Debug)]
struct HandlerAttrs {
    /// Handler name; also the exported symbol name.
    name: Option<String>,
    /// Whether to emit the C ABI exports for dynamic loading.
    export: bool,
}

impl HandlerAttrs {
    fn parse_meta_list(metas: Punctuated<Meta, Token![,]>) -> syn::Result<Self> {
        let mut attrs = HandlerAttrs::default();

        for meta in metas {
            match meta {
                Meta::Path(path) if path.is_ident("export") => {
                    attrs.export = true;
                }
                Meta::NameValue(nv) => {
                    let ident = nv
                        .path
                        .get_ident()
                        .ok_or_else(|| syn::Error::new_spanned(&nv.path, "expected identifier"))?
                        .to_string();

                    let lit = match &nv.value {
                        Expr::Lit(ExprLit { lit, .. }) => lit.clone(),
                        _ => return Err(syn::Error::new_spanned(&nv.value, "expected literal")),
                    };

                    match (ident.as_str(), lit) {
                        ("name", Lit::Str(lit_str)) => attrs.name = Some(lit_str.value()),
                        ("export", Lit::Bool(lit_bool)) => attrs.export = lit_bool.value,
                        ("name", other) | ("export", other) => {
                            return Err(syn::Error::new_spanned(
                                other,
                                format!("unexpected literal type for {}", ident),
                            ));
                        }
                        _ => {
                            return Err(syn::Error::new_spanned(
                                nv.path,
                                format!("unknown attribute: {}", ident),
                            ));
                        }
                    }
                }
                _ => {
                    return Err(syn::Error::new_spanned(
                        meta,
                        "expected `name = \"...\"` or `export`",
                    ));
                }
            }
        }

        Ok(attrs)
    }
}

/// Turn an async function into a `lambda_loop::Handler`.
///
/// Generates a unit struct named after the function in PascalCase with a
/// `Handler` suffix (`fn double` becomes `DoubleHandler`). The handler
/// completes through the deferred-value path with the function's result.
///
/// # Attributes
///
/// - `name` (optional): handler name, defaults to the function name
/// - `export` (optional): also export the handler from a `cdylib` under
///   `name` (plus `name_free`), for `DynamicLibraryProvider`
#[proc_macro_attribute]
pub fn handler(args: TokenStream, input: TokenStream) -> TokenStream {
    let args = parse_macro_input!(args with Punctuated::<Meta, Token![,]>::parse_terminated);
    let input_fn = parse_macro_input!(input as ItemFn);

    match generate_handler(args, input_fn) {
        Ok(tokens) => tokens.into(),
        Err(err) => err.to_compile_error().into(),
    }
}

fn generate_handler(
    args: Punctuated<Meta, Token![,]>,
    input_fn: ItemFn,
) -> syn::Result<proc_macro2::TokenStream> {
    let attrs = HandlerAttrs::parse_meta_list(args)?;

    if input_fn.sig.asyncness.is_none() {
        return Err(syn::Error::new_spanned(
            &input_fn.sig,
            "#[handler] functions must be async",
        ));
    }
    if input_fn.sig.inputs.len() != 2 {
        return Err(syn::Error::new_spanned(
            &input_fn.sig.inputs,
            "#[handler] functions take exactly (event, context)",
        ));
    }

    let fn_name = &input_fn.sig.ident;
    let fn_vis = &input_fn.vis;
    let handler_name = attrs.name.unwrap_or_else(|| fn_name.to_string());
    let struct_name = format_ident!("{}Handler", to_pascal_case(&fn_name.to_string()));

    let export = if attrs.export {
        quote! {
            lambda_loop::export_handler!(#handler_name, #struct_name);
        }
    } else {
        quote! {}
    };

    let expanded = quote! {
        /// Generated handler type.
        #[derive(Debug, Default, Clone, Copy)]
        #fn_vis struct #struct_name;

        impl #struct_name {
            /// Handler name.
            pub const NAME: &'static str = #handler_name;

            /// Create a new instance of the handler.
            pub fn new() -> Self {
                Self
            }
        }

        impl lambda_loop::Handler for #struct_name {
            fn call(
                &self,
                event: lambda_loop::serde_json::Value,
                ctx: lambda_loop::Context,
                _callback: lambda_loop::Callback,
            ) -> ::std::result::Result<lambda_loop::Completion, lambda_loop::HandlerError> {
                ::std::result::Result::Ok(lambda_loop::Completion::deferred(#fn_name(event, ctx)))
            }
        }

        #export

        #input_fn
    };

    Ok(expanded)
}

/// Convert a snake_case string to PascalCase.
fn to_pascal_case(s: &str) -> String {
    s.split('_')
        .map(|word| {
            let mut chars = word.chars();
            match chars.next() {
                None => String::new(),
                Some(first) => first.to_uppercase().chain(chars).collect(),
            }
        })
        .collect()
}
