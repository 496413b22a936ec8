extern crate proc_macro;
use proc_macro::TokenStream;
use proc_macro2::TokenStream as TokenStream2;
use quote::{format_ident, quote};
use syn::{Data, DeriveInput, Fields, Ident, parse_macro_input};

/// Derives `crate::storage::encdec::Encode`.
///
/// Struct fields (named or positional) are written back to back in declaration order, so a
/// struct whose fields all have fixed-width, order-preserving encodings yields keys which sort
/// by field order. Enum variants are prefixed with their position as a single byte.
#[proc_macro_derive(Encode)]
pub fn encode_derive(input: TokenStream) -> TokenStream {
    let input = parse_macro_input!(input as DeriveInput);
    let name = input.ident;

    let body = match input.data {
        Data::Struct(data) => {
            let appends = match &data.fields {
                Fields::Named(fields) => fields
                    .named
                    .iter()
                    .map(|f| {
                        let field_name = &f.ident;
                        quote! { encoder = encoder.append(&self.#field_name); }
                    })
                    .collect::<Vec<_>>(),
                Fields::Unnamed(fields) => (0..fields.unnamed.len())
                    .map(|i| {
                        let index = syn::Index::from(i);
                        quote! { encoder = encoder.append(&self.#index); }
                    })
                    .collect::<Vec<_>>(),
                Fields::Unit => vec![],
            };

            quote! {
                let mut encoder = crate::storage::encdec::EncodeBuilder::new();
                #(#appends)*
                encoder.build()
            }
        }
        Data::Enum(data_enum) => {
            let arms = data_enum
                .variants
                .iter()
                .enumerate()
                .map(|(index, variant)| {
                    let variant_name = &variant.ident;
                    let tag = index as u8;

                    match &variant.fields {
                        Fields::Unit => quote! {
                            Self::#variant_name => vec![#tag]
                        },
                        Fields::Unnamed(fields) => {
                            let bindings = positional_bindings(fields.unnamed.len());
                            quote! {
                                Self::#variant_name(#(#bindings),*) => {
                                    let mut encoder = crate::storage::encdec::EncodeBuilder::new()
                                        .append(&#tag);
                                    #(encoder = encoder.append(#bindings);)*
                                    encoder.build()
                                }
                            }
                        }
                        Fields::Named(fields) => {
                            let bindings: Vec<_> = fields
                                .named
                                .iter()
                                .filter_map(|f| f.ident.as_ref())
                                .collect();
                            quote! {
                                Self::#variant_name { #(#bindings),* } => {
                                    let mut encoder = crate::storage::encdec::EncodeBuilder::new()
                                        .append(&#tag);
                                    #(encoder = encoder.append(#bindings);)*
                                    encoder.build()
                                }
                            }
                        }
                    }
                });

            quote! {
                match self {
                    #(#arms),*
                }
            }
        }
        Data::Union(_) => {
            return syn::Error::new_spanned(name, "Encode only supports structs and enums")
                .to_compile_error()
                .into();
        }
    };

    quote! {
        impl crate::storage::encdec::Encode for #name {
            fn encode(&self) -> Vec<u8> {
                #body
            }
        }
    }
    .into()
}

/// Derives `crate::storage::encdec::Decode`, the inverse of the `Encode` derive.
#[proc_macro_derive(Decode)]
pub fn decode_derive(input: TokenStream) -> TokenStream {
    let input = parse_macro_input!(input as DeriveInput);
    let name = input.ident;

    let body = match input.data {
        Data::Struct(data) => match &data.fields {
            Fields::Named(fields) => {
                let names: Vec<_> = fields.named.iter().map(|f| &f.ident).collect();
                let decodes = fields.named.iter().map(|f| {
                    let field_name = &f.ident;
                    decode_field(quote! { #field_name }, &f.ty)
                });

                quote! {
                    let mut bytes = bytes;
                    #(#decodes)*
                    Ok((Self { #(#names),* }, bytes))
                }
            }
            Fields::Unnamed(fields) => {
                let bindings = positional_bindings(fields.unnamed.len());
                let decodes = fields
                    .unnamed
                    .iter()
                    .zip(bindings.iter())
                    .map(|(f, binding)| decode_field(quote! { #binding }, &f.ty));

                quote! {
                    let mut bytes = bytes;
                    #(#decodes)*
                    Ok((Self(#(#bindings),*), bytes))
                }
            }
            Fields::Unit => quote! { Ok((Self, bytes)) },
        },
        Data::Enum(data_enum) => {
            let arms = data_enum
                .variants
                .iter()
                .enumerate()
                .map(|(index, variant)| {
                    let variant_name = &variant.ident;
                    let tag = index as u8;

                    match &variant.fields {
                        Fields::Unit => quote! {
                            #tag => Ok((Self::#variant_name, bytes))
                        },
                        Fields::Unnamed(fields) => {
                            let bindings = positional_bindings(fields.unnamed.len());
                            let decodes = fields
                                .unnamed
                                .iter()
                                .zip(bindings.iter())
                                .map(|(f, binding)| decode_field(quote! { #binding }, &f.ty));

                            quote! {
                                #tag => {
                                    let mut bytes = bytes;
                                    #(#decodes)*
                                    Ok((Self::#variant_name(#(#bindings),*), bytes))
                                }
                            }
                        }
                        Fields::Named(fields) => {
                            let names: Vec<_> = fields.named.iter().map(|f| &f.ident).collect();
                            let decodes = fields.named.iter().map(|f| {
                                let field_name = &f.ident;
                                decode_field(quote! { #field_name }, &f.ty)
                            });

                            quote! {
                                #tag => {
                                    let mut bytes = bytes;
                                    #(#decodes)*
                                    Ok((Self::#variant_name { #(#names),* }, bytes))
                                }
                            }
                        }
                    }
                });

            quote! {
                let (kind, bytes) = match bytes.split_first() {
                    Some((kind, rest)) => (*kind, rest),
                    None => {
                        return Err(crate::storage::encdec::DecodingError::MalformedInput(
                            "enum insufficient bytes".to_string(),
                            bytes.to_vec(),
                        ))
                    }
                };

                match kind {
                    #(#arms,)*
                    other => Err(crate::storage::encdec::DecodingError::InvalidEnumKind(vec![other])),
                }
            }
        }
        Data::Union(_) => {
            return syn::Error::new_spanned(name, "Decode only supports structs and enums")
                .to_compile_error()
                .into();
        }
    };

    quote! {
        impl crate::storage::encdec::Decode for #name {
            fn decode(bytes: &[u8]) -> crate::storage::encdec::DecodingResult<'_, Self> {
                #body
            }
        }
    }
    .into()
}

fn positional_bindings(len: usize) -> Vec<Ident> {
    (0..len).map(|i| format_ident!("field{}", i)).collect()
}

fn decode_field(binding: TokenStream2, ty: &syn::Type) -> TokenStream2 {
    quote! {
        let (#binding, rest) = <#ty as crate::storage::encdec::Decode>::decode(bytes)?;
        bytes = rest;
    }
}
