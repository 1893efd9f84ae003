use proc_macro::TokenStream;
use quote::quote;
use syn::{FnArg, ImplItem, ItemImpl, Pat, ReturnType, Type};

pub fn expand(_args: TokenStream, input: TokenStream) -> TokenStream {
    let item = syn::parse_macro_input!(input as ItemImpl);

    let generated = match generate(&item) {
        Ok(tokens) => tokens,
        Err(e) => e.to_compile_error(),
    };

    quote!(#item #generated).into()
}

struct Method {
    name: syn::Ident,
    arg_types: Vec<Type>,
    returns_value: bool,
}

fn generate(item: &ItemImpl) -> syn::Result<proc_macro2::TokenStream> {
    let self_ty = &item.self_ty;

    let mut methods = Vec::new();
    for impl_item in &item.items {
        if let ImplItem::Fn(method) = impl_item {
            methods.push(parse_method(method)?);
        }
    }

    let registrations = methods.iter().map(generate_registration);

    Ok(quote! {
        impl #self_ty {
            /// Builds the `MethodTable` this handler's registry connection
            /// dispatches into, one thunk per method declared on the trait
            /// impl this attribute decorates.
            pub fn into_method_table(self: ::std::sync::Arc<Self>) -> ::pipe_rpc::dispatch::MethodTable {
                let mut table = ::pipe_rpc::dispatch::MethodTable::new();
                #(#registrations)*
                table
            }
        }
    })
}

fn parse_method(method: &syn::ImplItemFn) -> syn::Result<Method> {
    let name = method.sig.ident.clone();

    let mut arg_types = Vec::new();
    for input in method.sig.inputs.iter() {
        match input {
            FnArg::Receiver(_) => continue,
            FnArg::Typed(pat_ty) => {
                if !matches!(pat_ty.pat.as_ref(), Pat::Ident(_)) {
                    return Err(syn::Error::new_spanned(
                        &pat_ty.pat,
                        "rpc_handler methods must use simple identifier parameter names",
                    ));
                }
                arg_types.push((*pat_ty.ty).clone());
            }
        }
    }

    let returns_value = !matches!(method.sig.output, ReturnType::Default);

    Ok(Method { name, arg_types, returns_value })
}

/// Emits one `table.register("name", thunk)` call. The thunk decodes its
/// positional arguments out of the request envelope's payload, invokes the
/// method on a cloned handler `Arc`, and wraps the result as a reply
/// envelope — or, for a method with no declared return type, sends no reply
/// at all (spec §4.9.4).
fn generate_registration(method: &Method) -> proc_macro2::TokenStream {
    let name = &method.name;
    let name_str = name.to_string();
    let arity = method.arg_types.len();

    let arg_idents: Vec<_> = (0..arity)
        .map(|idx| syn::Ident::new(&format!("arg{idx}"), proc_macro2::Span::call_site()))
        .collect();
    let decode_lets = arg_idents.iter().zip(method.arg_types.iter()).enumerate().map(
        |(idx, (ident, ty))| {
            quote! {
                let #ident = ::pipe_rpc::core::Payload::decode_element::<#ty>(&elements, #idx)?;
            }
        },
    );

    let invoke = quote! {
        handler.#name(#(#arg_idents),*).await
    };

    let body = if method.returns_value {
        quote! {
            let result = #invoke;
            let payload = ::pipe_rpc::core::Payload::from_value(&result)?;
            ::std::result::Result::Ok(::std::option::Option::Some(payload))
        }
    } else {
        quote! {
            #invoke;
            ::std::result::Result::Ok(::std::option::Option::None)
        }
    };

    quote! {
        table.register(#name_str, {
            let handler = ::std::sync::Arc::clone(&self);
            move |payload: ::std::option::Option<::pipe_rpc::core::Payload>| {
                let handler = ::std::sync::Arc::clone(&handler);
                ::std::boxed::Box::pin(async move {
                    let empty = ::pipe_rpc::core::Payload::from_args(&[]).unwrap();
                    let elements = payload.as_ref().unwrap_or(&empty).as_tuple_elements(#arity)?;
                    #(#decode_lets)*
                    #body
                })
            }
        });
    }
}
