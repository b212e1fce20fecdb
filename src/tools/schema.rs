//! 工具参数 Schema 与工具描述
//!
//! 提供两种方式生成参数 schema：
//! - 手工声明参数列表（ToolParameter），基础类型映射为 string / integer / number / boolean / array / object / null，
//!   没有默认值的参数为必填；
//! - 由参数结构体通过 schemars 自动生成（schema_for_args）。

use schemars::{schema_for, JsonSchema};
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};

/// 参数基础类型
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ParamType {
    String,
    Integer,
    Number,
    Boolean,
    Array,
    Object,
    Null,
}

impl ParamType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ParamType::String => "string",
            ParamType::Integer => "integer",
            ParamType::Number => "number",
            ParamType::Boolean => "boolean",
            ParamType::Array => "array",
            ParamType::Object => "object",
            ParamType::Null => "null",
        }
    }
}

/// 单个参数声明
#[derive(Debug, Clone, PartialEq)]
pub struct ToolParameter {
    pub name: String,
    pub ty: ParamType,
    pub description: String,
    /// 有默认值即为可选参数
    pub default: Option<Value>,
}

impl ToolParameter {
    /// 必填参数
    pub fn required(name: impl Into<String>, ty: ParamType) -> Self {
        Self {
            name: name.into(),
            ty,
            description: String::new(),
            default: None,
        }
    }

    /// 带默认值的可选参数
    pub fn optional(name: impl Into<String>, ty: ParamType, default: Value) -> Self {
        Self {
            name: name.into(),
            ty,
            description: String::new(),
            default: Some(default),
        }
    }

    pub fn describe(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    pub fn is_required(&self) -> bool {
        self.default.is_none()
    }
}

/// 由参数列表生成 `{"type": "object", "properties": ..., "required": [...]}`
pub fn parameters_schema(params: &[ToolParameter]) -> Value {
    let mut properties = Map::new();
    let mut required = Vec::new();
    for p in params {
        let mut prop = json!({
            "type": p.ty.as_str(),
            "description": p.description,
        });
        match &p.default {
            Some(default) => {
                prop["default"] = default.clone();
            }
            None => required.push(Value::String(p.name.clone())),
        }
        properties.insert(p.name.clone(), prop);
    }
    json!({
        "type": "object",
        "properties": properties,
        "required": required,
    })
}

/// 无参数工具的 schema
pub fn empty_schema() -> Value {
    parameters_schema(&[])
}

/// 由参数结构体自动生成 schema（去掉 $schema / title，保留 properties / required / definitions）
pub fn schema_for_args<T: JsonSchema>() -> Value {
    let schema = schema_for!(T);
    let mut value = serde_json::to_value(&schema).unwrap_or_else(|_| empty_schema());
    if let Some(obj) = value.as_object_mut() {
        obj.remove("$schema");
        obj.remove("title");
        obj.entry("type").or_insert_with(|| Value::String("object".to_string()));
        obj.entry("properties").or_insert_with(|| Value::Object(Map::new()));
    }
    value
}

/// 暴露给后端的工具描述：名称、文档、参数 schema
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolDescriptor {
    pub name: String,
    pub description: String,
    pub parameters: Value,
}

impl ToolDescriptor {
    /// OpenAI 兼容的 tools 数组元素
    pub fn to_openai(&self) -> Value {
        json!({
            "type": "function",
            "function": {
                "name": self.name,
                "description": self.description,
                "parameters": self.parameters,
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[allow(dead_code)]
    #[derive(JsonSchema)]
    struct WeatherArgs {
        /// 城市名
        city: String,
        days: Option<u32>,
    }

    #[test]
    fn test_parameters_schema_required_and_defaults() {
        let schema = parameters_schema(&[
            ToolParameter::required("city", ParamType::String).describe("city name"),
            ToolParameter::optional("days", ParamType::Integer, json!(1)),
        ]);
        assert_eq!(schema["type"], "object");
        assert_eq!(schema["properties"]["city"]["type"], "string");
        assert_eq!(schema["properties"]["days"]["default"], 1);
        assert_eq!(schema["required"], json!(["city"]));
    }

    #[test]
    fn test_schema_for_args() {
        let schema = schema_for_args::<WeatherArgs>();
        assert!(schema.get("$schema").is_none());
        assert!(schema["properties"].get("city").is_some());
        assert_eq!(schema["required"], json!(["city"]));
    }

    #[test]
    fn test_descriptor_to_openai() {
        let desc = ToolDescriptor {
            name: "echo".to_string(),
            description: "Echo text".to_string(),
            parameters: empty_schema(),
        };
        let v = desc.to_openai();
        assert_eq!(v["type"], "function");
        assert_eq!(v["function"]["name"], "echo");
        assert_eq!(v["function"]["parameters"]["required"], json!([]));
    }
}
