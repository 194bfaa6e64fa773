//! The label-legibility root-cause prompt.

const PREAMBLE: &str = "\
Dado un [Titulo] y [Comentario] sobre una observación relacionada con las etiquetas de banano \
destinadas a la exportación a Japón, realizar un análisis exhaustivo y adaptativo que explore \
todos los aspectos posibles. El objetivo principal es identificar las causas del problema de \
legibilidad de las etiquetas por los lectores en Japón. Este análisis debe:

1. Analizar el problema central
2. Explorar el impacto en la codificación de información
3. Investigar problemas relacionados al material/tinta
4. Detectar problemas del proceso de impresión
5. Evaluar causas posibles
6. Proponer acciones de mejora

La escritura tiene que estar bien redactada, con coherencia y cohesión. Se debe utilizar un \
lenguaje técnico y profesional. NO SE COLOCA #, ##, ### o cualquier otro tipo de formato. \
SOLO POR ESPACIADO PARA SEPARAR PÁRRAFOS.";

/// Render the prompt for one report. Title and comment are inserted as-is.
pub fn render(title: &str, comment: &str) -> String {
    format!("{PREAMBLE}\n\n[Titulo]: {title}\n[Comentario]: {comment}\n")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_render_places_fields_last() {
        let prompt = render("Etiqueta borrosa", "No escanea en Japón");
        assert!(prompt.starts_with("Dado un [Titulo] y [Comentario]"));
        assert!(prompt.contains("6. Proponer acciones de mejora"));
        assert!(prompt.ends_with("[Titulo]: Etiqueta borrosa\n[Comentario]: No escanea en Japón\n"));
    }

    #[test]
    fn test_render_does_not_interpret_braces() {
        let prompt = render("{title}", "100% {x}");
        assert!(prompt.contains("[Titulo]: {title}\n[Comentario]: 100% {x}"));
    }
}
