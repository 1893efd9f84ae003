use proc_macro::TokenStream;
use quote::{format_ident, quote};
use syn::{FnArg, ItemTrait, Pat, ReturnType, TraitItem, Type};

pub fn expand(_args: TokenStream, input: TokenStream) -> TokenStream {
    let item = syn::parse_macro_input!(input as ItemTrait);

    let generated = match generate(&item) {
        Ok(tokens) => tokens,
        Err(e) => e.to_compile_error(),
    };

    quote!(#item #generated).into()
}

struct Method {
    name: syn::Ident,
    args: Vec<(syn::Ident, Type)>,
    output: Option<Type>,
}

fn generate(item: &ItemTrait) -> syn::Result<proc_macro2::TokenStream> {
    let trait_name = &item.ident;
    let proxy_name = format_ident!("{}Proxy", trait_name);

    let mut methods = Vec::new();
    for trait_item in &item.items {
        if let TraitItem::Fn(method) = trait_item {
            methods.push(parse_method(method)?);
        }
    }

    let method_impls = methods.iter().map(generate_method);

    // `#trait_name`'s methods return the plain value type (`i64`, not
    // `Result<i64, _>`) — that's the shape the worker-side `#[rpc_handler]`
    // impl needs. A proxy call, though, is a *caller-facing* RPC client: a
    // `RemoteError`, `NoWorkers`, or `Timeout` outcome is ordinary and
    // expected (spec §4.11), not a bug in the callee, so it has to surface
    // as `Err` rather than a panic. Those two signatures can't coexist on
    // one method, so the proxy is a standalone type with its own inherent
    // methods returning `Result<_, RpcError>`, not an `impl #trait_name`.
    Ok(quote! {
        /// Generated proxy for [`#trait_name`] over a
        /// [`::pipe_rpc::proxy::RpcCaller`]. Construct one with
        /// [`::pipe_rpc::proxy::UnicastCaller`] to target a single worker, or
        /// [`::pipe_rpc::proxy::BroadcastCaller`] to fan the call out to every
        /// connected worker and race the replies. Every method returns
        /// `Result<_, ::pipe_rpc::proxy::RpcError>` rather than panicking on
        /// a remote failure.
        pub struct #proxy_name<C: ::pipe_rpc::proxy::RpcCaller> {
            caller: C,
            timeout: ::std::time::Duration,
        }

        impl<C: ::pipe_rpc::proxy::RpcCaller> #proxy_name<C> {
            pub fn new(caller: C, timeout: ::std::time::Duration) -> Self {
                #proxy_name { caller, timeout }
            }

            #(#method_impls)*
        }
    })
}

fn parse_method(method: &syn::TraitItemFn) -> syn::Result<Method> {
    let name = method.sig.ident.clone();

    let mut args = Vec::new();
    for input in method.sig.inputs.iter() {
        match input {
            FnArg::Receiver(_) => continue,
            FnArg::Typed(pat_ty) => {
                let ident = match pat_ty.pat.as_ref() {
                    Pat::Ident(p) => p.ident.clone(),
                    other => {
                        return Err(syn::Error::new_spanned(
                            other,
                            "rpc_interface methods must use simple identifier parameter names",
                        ))
                    }
                };
                args.push((ident, (*pat_ty.ty).clone()));
            }
        }
    }

    let output = match &method.sig.output {
        ReturnType::Default => None,
        ReturnType::Type(_, ty) => Some((**ty).clone()),
    };

    Ok(Method { name, args, output })
}

fn generate_method(method: &Method) -> proc_macro2::TokenStream {
    let name = &method.name;
    let name_str = name.to_string();
    let arg_names: Vec<_> = method.args.iter().map(|(n, _)| n).collect();
    let arg_types: Vec<_> = method.args.iter().map(|(_, t)| t).collect();

    let values = quote! {
        vec![#(::serde_json::to_value(&#arg_names).expect("rpc argument must serialize")),*]
    };

    match &method.output {
        None => quote! {
            pub async fn #name(&self, #(#arg_names: #arg_types),*) -> ::std::result::Result<(), ::pipe_rpc::proxy::RpcError> {
                let payload = ::pipe_rpc::core::Payload::from_args(&#values)
                    .expect("rpc argument list must encode");
                let request = ::pipe_rpc::core::PipeMessage::new(#name_str, payload);
                ::pipe_rpc::proxy::call_void(&self.caller, request, self.timeout).await
            }
        },
        Some(output_ty) => quote! {
            pub async fn #name(&self, #(#arg_names: #arg_types),*) -> ::std::result::Result<#output_ty, ::pipe_rpc::proxy::RpcError> {
                let payload = ::pipe_rpc::core::Payload::from_args(&#values)
                    .expect("rpc argument list must encode");
                let request = ::pipe_rpc::core::PipeMessage::new(#name_str, payload);
                ::pipe_rpc::proxy::call_value::<_, #output_ty>(&self.caller, request, self.timeout).await
            }
        },
    }
}
