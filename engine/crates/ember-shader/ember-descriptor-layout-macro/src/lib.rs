use proc_macro::TokenStream;
use quote::quote;
use syn::{Attribute, Data, DeriveInput, Fields, Meta, parse_macro_input};

/// 为结构体派生 `DescriptorBindingLayout`
///
/// 支持的属性：
/// - binding: 指定绑定点编号，没有该属性的字段会被忽略
/// - descriptor_type: 指定描述符类型（如 UNIFORM_BUFFER, COMBINED_IMAGE_SAMPLER 等）
/// - count: 指定描述符数量，可以是任意常量表达式
/// - stage: 指定着色器阶段（如 VERTEX | FRAGMENT）
/// - flags: 指定描述符绑定标志（如 UPDATE_AFTER_BIND | PARTIALLY_BOUND）
///
/// 使用处需要引入 `ash::vk`
#[proc_macro_derive(DescriptorBinding, attributes(binding, descriptor_type, count, stage, flags))]
pub fn derive_descriptor_binding(input: TokenStream) -> TokenStream {
    let input = parse_macro_input!(input as DeriveInput);
    match expand(&input) {
        Ok(tokens) => tokens.into(),
        Err(err) => err.to_compile_error().into(),
    }
}

fn expand(input: &DeriveInput) -> syn::Result<proc_macro2::TokenStream> {
    let struct_name = &input.ident;

    // 只处理结构体类型，且只支持具名字段
    let fields = match &input.data {
        Data::Struct(data) => match &data.fields {
            Fields::Named(fields) => &fields.named,
            _ => return Err(syn::Error::new_spanned(struct_name, "only named fields are supported")),
        },
        _ => return Err(syn::Error::new_spanned(struct_name, "only structs are supported")),
    };

    let mut method_names = Vec::new();
    let mut items = Vec::new();
    let mut seen_bindings = Vec::new();

    for field in fields {
        let Some(field_name) = field.ident.as_ref() else {
            continue;
        };
        let Some(binding) = get_binding_value(&field.attrs)? else {
            continue;
        };
        if seen_bindings.contains(&binding) {
            return Err(syn::Error::new_spanned(field_name, format!("binding {binding} is declared twice")));
        }
        seen_bindings.push(binding);

        let descriptor_type = get_descriptor_type(&field.attrs)?;
        let count = get_count_value(&field.attrs);
        let stage = get_stage_value(&field.attrs)?;
        let flags = get_flags_value(&field.attrs)?;

        // 方法名去掉前后缀下划线
        let trimmed = field_name.to_string().trim_matches('_').to_string();
        method_names.push(syn::Ident::new(&trimmed, field_name.span()));
        items.push(quote! {
            ember_descriptor_layout_trait::DescriptorBindingItem {
                name: #trimmed,
                binding: #binding,
                descriptor_type: #descriptor_type,
                stage_flags: #stage,
                count: #count,
                flags: #flags,
            }
        });
    }

    // 1. 每个字段生成一个静态 getter，返回对应的 DescriptorBindingItem
    // 2. 实现 DescriptorBindingLayout trait，返回完整的 DescriptorBindingItem 数组
    Ok(quote! {
        impl #struct_name {
            #(
                pub fn #method_names() -> &'static ember_descriptor_layout_trait::DescriptorBindingItem {
                    static CURSOR: std::sync::OnceLock<ember_descriptor_layout_trait::DescriptorBindingItem> =
                        std::sync::OnceLock::new();
                    CURSOR.get_or_init(|| #items)
                }
            )*
        }

        impl ember_descriptor_layout_trait::DescriptorBindingLayout for #struct_name {
            fn get_shader_bindings() -> Vec<ember_descriptor_layout_trait::DescriptorBindingItem> {
                vec![#(#items),*]
            }
        }
    })
}

/// 读取形如 `#[name = "..."]` 的字符串属性
fn get_str_attr(attrs: &[Attribute], name: &str) -> Option<syn::LitStr> {
    for attr in attrs {
        if attr.path().is_ident(name)
            && let Meta::NameValue(meta) = &attr.meta
            && let syn::Expr::Lit(syn::ExprLit {
                lit: syn::Lit::Str(lit_str),
                ..
            }) = &meta.value
        {
            return Some(lit_str.clone());
        }
    }
    None
}

/// 将 `"A | B"` 展开为 `prefix::A | prefix::B`
fn parse_flag_list(lit: &syn::LitStr, prefix: &str) -> syn::Result<syn::Expr> {
    let expr = lit
        .value()
        .split('|')
        .map(|s| s.trim())
        .filter(|s| !s.is_empty())
        .map(|s| format!("{prefix}::{s}"))
        .collect::<Vec<_>>()
        .join(" | ");
    syn::parse_str(&expr).map_err(|_| syn::Error::new_spanned(lit, format!("invalid {prefix} list")))
}

/// 属性格式示例：#[binding = 0]
fn get_binding_value(attrs: &[Attribute]) -> syn::Result<Option<u32>> {
    for attr in attrs {
        if attr.path().is_ident("binding")
            && let Meta::NameValue(meta) = &attr.meta
        {
            if let syn::Expr::Lit(syn::ExprLit {
                lit: syn::Lit::Int(lit_int),
                ..
            }) = &meta.value
            {
                return Ok(Some(lit_int.base10_parse()?));
            }
            return Err(syn::Error::new_spanned(&meta.value, "binding must be an integer literal"));
        }
    }
    Ok(None)
}

/// 属性格式示例：#[descriptor_type = "UNIFORM_BUFFER"]
fn get_descriptor_type(attrs: &[Attribute]) -> syn::Result<syn::Expr> {
    match get_str_attr(attrs, "descriptor_type") {
        Some(lit) => parse_flag_list(&lit, "vk::DescriptorType"),
        // 默认值：统一缓冲区
        None => Ok(syn::parse_quote!(vk::DescriptorType::UNIFORM_BUFFER)),
    }
}

/// 属性格式示例：#[count = 1] 或 #[count = MAX_TEXTURES]
fn get_count_value(attrs: &[Attribute]) -> syn::Expr {
    for attr in attrs {
        if attr.path().is_ident("count")
            && let Meta::NameValue(meta) = &attr.meta
        {
            return meta.value.clone();
        }
    }
    syn::parse_quote!(1)
}

/// 属性格式示例：#[stage = "VERTEX | FRAGMENT"]
fn get_stage_value(attrs: &[Attribute]) -> syn::Result<syn::Expr> {
    match get_str_attr(attrs, "stage") {
        Some(lit) => parse_flag_list(&lit, "vk::ShaderStageFlags"),
        None => Ok(syn::parse_quote!(vk::ShaderStageFlags::VERTEX | vk::ShaderStageFlags::FRAGMENT)),
    }
}

/// 属性格式示例：#[flags = "UPDATE_AFTER_BIND | PARTIALLY_BOUND"]
fn get_flags_value(attrs: &[Attribute]) -> syn::Result<syn::Expr> {
    match get_str_attr(attrs, "flags") {
        Some(lit) => parse_flag_list(&lit, "vk::DescriptorBindingFlags"),
        None => Ok(syn::parse_quote!(vk::DescriptorBindingFlags::empty())),
    }
}
